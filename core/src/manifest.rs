//! Job manifest: the JSON sidecar written next to a RunInput file.

use crate::{
    checkpoint::write_atomically,
    error::{SimError, SimResult},
    layout::RunInput,
    reference_kernel::kind_label,
    types::{RunId, Turn},
    version::LAYOUT_VERSION,
};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, path::Path};

/// Separator reserved for file names built from study and job names.
pub const NAME_SEPARATOR: &str = "__";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobManifest {
    pub study_name:       String,
    pub job_name:         String,
    pub run_id:           RunId,
    pub runner_version:   String,
    pub layout_version:   String,
    pub num_elements:     usize,
    /// Alive particles in the initial state.
    pub num_particles:    usize,
    pub num_turns:        Turn,
    pub checkpoint_every: Option<Turn>,
    pub element_kinds:    BTreeMap<String, usize>,
}

impl JobManifest {
    pub fn describe(study_name: &str, job_name: &str, input: &RunInput) -> SimResult<Self> {
        validate_name("study_name", study_name)?;
        validate_name("job_name", job_name)?;
        let element_kinds = input
            .lattice()
            .kind_counts()
            .into_iter()
            .map(|(kind, count)| (kind_label(kind), count))
            .collect();
        Ok(Self {
            study_name:       study_name.to_string(),
            job_name:         job_name.to_string(),
            run_id:           input.lineage_id(),
            runner_version:   env!("CARGO_PKG_VERSION").to_string(),
            layout_version:   LAYOUT_VERSION.to_string(),
            num_elements:     input.num_elements(),
            num_particles:    input.initial_state().status_counts().alive,
            num_turns:        input.num_turns(),
            checkpoint_every: input.checkpoint_every(),
            element_kinds,
        })
    }

    /// `<study>__<job>`, the stem used for the job's files.
    pub fn file_stem(&self) -> String {
        format!("{}{NAME_SEPARATOR}{}", self.study_name, self.job_name)
    }

    pub fn write(&self, path: &Path) -> SimResult<()> {
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        write_atomically(path, json.as_bytes())
    }

    pub fn read(path: &Path) -> SimResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| SimError::storage(path, e))?;
        Ok(serde_json::from_str(&text)?)
    }
}

fn validate_name(field: &str, name: &str) -> SimResult<()> {
    if name.is_empty() {
        return Err(SimError::InvalidInput(format!("{field} must not be empty")));
    }
    if name.contains(NAME_SEPARATOR) {
        return Err(SimError::InvalidInput(format!(
            "the character sequence '{NAME_SEPARATOR}' is not allowed in {field}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        layout::RunInputBuilder,
        reference_kernel::{fodo_ring, linspace_ensemble},
    };

    fn input() -> RunInput {
        RunInputBuilder::new(fodo_ring(2, 3), linspace_ensemble(6, 0.01), 20)
            .checkpoint_every(5)
            .build()
            .unwrap()
    }

    #[test]
    fn describes_the_job() {
        let manifest = JobManifest::describe("tune_scan", "q1", &input()).unwrap();
        assert_eq!(manifest.num_particles, 6);
        assert_eq!(manifest.num_turns, 20);
        assert_eq!(manifest.checkpoint_every, Some(5));
        assert_eq!(manifest.element_kinds["drift"], 4);
        assert_eq!(manifest.element_kinds["monitor"], 1);
        assert_eq!(manifest.file_stem(), "tune_scan__q1");
        assert_eq!(manifest.run_id, input().lineage_id());
    }

    #[test]
    fn double_underscore_is_rejected() {
        assert!(matches!(
            JobManifest::describe("tune__scan", "q1", &input()),
            Err(SimError::InvalidInput(_))
        ));
        assert!(JobManifest::describe("tune_scan", "q__1", &input()).is_err());
        assert!(JobManifest::describe("", "q1", &input()).is_err());
    }

    #[test]
    fn written_manifest_reads_back() {
        let path = std::env::temp_dir().join(format!("beamrun-manifest-{}.json", uuid::Uuid::new_v4()));
        let manifest = JobManifest::describe("s", "j", &input()).unwrap();
        manifest.write(&path).unwrap();
        assert_eq!(JobManifest::read(&path).unwrap(), manifest);
        std::fs::remove_file(&path).unwrap();
    }
}
