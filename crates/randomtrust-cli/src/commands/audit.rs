use std::path::Path;

use randomtrust_core::Services;

use super::{CommandError, print_json};

/// Store an external sequence given inline or as a hex file.
pub fn run(
    services: &Services,
    name: &str,
    description: Option<&str>,
    hex: Option<&str>,
    file: Option<&Path>,
) -> Result<(), CommandError> {
    let payload = match (hex, file) {
        (Some(h), None) => h.to_string(),
        (None, Some(path)) => std::fs::read_to_string(path)?,
        _ => {
            return Err(randomtrust_core::InvalidInput::new(
                "input",
                "provide exactly one of --hex or --file",
            )
            .into());
        }
    };
    let record = services.audit.store_sequence(name, description, &payload)?;
    log::info!("audit upload {} stored at {}", record.audit_id, record.result_path);
    print_json(&record)
}
