use miette::Result;
use wirepack_core::version::version_string;

pub fn run(json: bool) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::json!({ "name": "wirepack", "version": wirepack_core::VERSION })
        );
    } else {
        println!("{}", version_string());
    }
    Ok(())
}
