//! Human output goes to stdout line by line; `--json` prints one document.

use anyhow::Result;
use serde_json::Value;

use crate::GlobalOpts;

pub fn print(opts: &GlobalOpts, data: Value, human: impl FnOnce(&Value) -> Vec<String>) -> Result<()> {
    if opts.json {
        println!("{}", serde_json::to_string_pretty(&data)?);
    } else {
        for line in human(&data) {
            println!("{line}");
        }
    }
    Ok(())
}
