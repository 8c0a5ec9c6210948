//! Schema migrations (§6): a document created under an older schema
//! version is brought forward one version at a time. Each migration is a
//! plain function over the live [`Document`], registered here in a fixed
//! table indexed by the version it migrates *to*.

use grist_types::GristError;

use super::Document;

pub const CURRENT_SCHEMA_VERSION: u32 = 1;

type Migration = fn(&mut Document) -> Result<(), GristError>;

/// Ordered by target version; entry `i` migrates from version `i` to
/// version `i + 1`. Empty for now since this is the first schema version
/// this engine has ever shipped — new entries get pushed here as the
/// metadata schema changes, never removed or reordered.
const MIGRATIONS: &[Migration] = &[];

/// Applies every migration needed to bring a document stored at
/// `from_version` up to [`CURRENT_SCHEMA_VERSION`], returning the new
/// version. Rejects a `from_version` newer than what this build knows
/// about rather than silently truncating it.
pub fn migrate(doc: &mut Document, from_version: u32) -> Result<u32, GristError> {
    if from_version > CURRENT_SCHEMA_VERSION {
        return Err(GristError::invalid_action(format!(
            "document schema version {from_version} is newer than this engine's {CURRENT_SCHEMA_VERSION}"
        )));
    }
    for version in from_version..CURRENT_SCHEMA_VERSION {
        let step = MIGRATIONS.get(version as usize).ok_or_else(|| {
            GristError::invalid_action(format!("no migration registered for schema version {version}"))
        })?;
        step(doc)?;
    }
    Ok(CURRENT_SCHEMA_VERSION)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrating_from_current_version_is_a_no_op() {
        let mut doc = Document::new();
        let result = migrate(&mut doc, CURRENT_SCHEMA_VERSION).unwrap();
        assert_eq!(result, CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn migrating_from_a_future_version_is_rejected() {
        let mut doc = Document::new();
        assert!(migrate(&mut doc, CURRENT_SCHEMA_VERSION + 1).is_err());
    }
}
