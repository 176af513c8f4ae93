use std::path::Path;

use randomtrust_core::Services;
use serde_json::json;
use uuid::Uuid;

use super::{CommandError, print_json};

/// Write `{run_id}_bits.txt` into `output_dir` and report where it went.
pub fn run(
    services: &Services,
    run_id: Uuid,
    min_bits: Option<usize>,
    output_dir: &Path,
) -> Result<(), CommandError> {
    let export = services.rng.export_bits(run_id, min_bits)?;
    std::fs::create_dir_all(output_dir)?;
    let path = output_dir.join(&export.filename);
    std::fs::write(&path, &export.content)?;
    log::info!("wrote {} bits to {}", export.bits_count, path.display());
    print_json(&json!({
        "run_id": export.run_id,
        "bits_count": export.bits_count,
        "filename": export.filename,
        "path": path.display().to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use randomtrust_core::{Backends, OutputFormat, ServiceError, Settings};

    #[test]
    fn test_export_writes_bits_file() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            data_dir: dir.path().join("data"),
            ..Settings::default()
        };
        let services = Services::new(&settings, Backends::on_disk(&settings));
        let generated = services
            .rng
            .generate(16, OutputFormat::Hex, Some(3), None)
            .unwrap();

        let out = dir.path().join("exports");
        run(&services, generated.run_id, Some(128), &out).unwrap();

        let text =
            std::fs::read_to_string(out.join(format!("{}_bits.txt", generated.run_id))).unwrap();
        assert_eq!(text.len(), 128);
        assert!(text.bytes().all(|b| b == b'0' || b == b'1'));
    }

    #[test]
    fn test_export_refuses_short_runs() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            data_dir: dir.path().to_path_buf(),
            ..Settings::default()
        };
        let services = Services::new(&settings, Backends::on_disk(&settings));
        let generated = services
            .rng
            .generate(16, OutputFormat::Hex, Some(3), None)
            .unwrap();
        let err = run(&services, generated.run_id, Some(129), dir.path()).unwrap_err();
        assert!(matches!(
            err,
            CommandError::Service(ServiceError::InsufficientBits { .. })
        ));
    }
}
