use crate::output::{print_certificate, print_json};
use stackctl_core::workflow;
use std::path::Path;

pub fn run(root: &Path, mode: &str, json: bool) -> anyhow::Result<()> {
    let settings = super::load_settings(root, mode)?;
    let record = workflow::ssl(&settings)?;
    if json {
        return print_json(&record);
    }
    print_certificate(&record);
    Ok(())
}
