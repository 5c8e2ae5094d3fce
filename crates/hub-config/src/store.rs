use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::component::ComponentKind;

/// Suffix marking a pending (unapplied) artifact next to its formal file.
const PENDING_SUFFIX: &str = "new";

// ---------------------------------------------------------------------------
// ArtifactStore — on-disk layout for formal and pending configurations
// ---------------------------------------------------------------------------

/// Owns the artifact tree: one subdirectory per kind, `<id>.<ext>` for formal
/// artifacts and `<id>.<ext>.new` for pending ones.
///
/// All writes go through `write-temp-then-rename` so concurrent readers only
/// ever observe complete files.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Open (creating per-kind subdirectories as needed) the store at `root`.
    pub fn open(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let root = root.into();
        for kind in ComponentKind::ALL {
            std::fs::create_dir_all(root.join(kind.dir()))
                .map_err(|e| anyhow::anyhow!("create {}/{}: {e}", root.display(), kind.dir()))?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reject ids that would escape the per-kind directory or collide with
    /// the pending suffix.
    pub fn validate_id(id: &str) -> anyhow::Result<()> {
        if id.is_empty() {
            anyhow::bail!("component id must not be empty");
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            anyhow::bail!("component id {id:?} may only contain [A-Za-z0-9_-]");
        }
        Ok(())
    }

    fn formal_path(&self, kind: ComponentKind, id: &str) -> PathBuf {
        self.root
            .join(kind.dir())
            .join(format!("{id}.{}", kind.ext()))
    }

    fn pending_path(&self, kind: ComponentKind, id: &str) -> PathBuf {
        self.root
            .join(kind.dir())
            .join(format!("{id}.{}.{PENDING_SUFFIX}", kind.ext()))
    }

    // -- reads --------------------------------------------------------------

    /// Load every formal artifact of `kind` as `(id, raw)`, sorted by id.
    pub fn load_formal(&self, kind: ComponentKind) -> anyhow::Result<Vec<(String, String)>> {
        self.load_with_suffix(kind, kind.ext())
    }

    /// Load every pending artifact of `kind` as `(id, raw)`, sorted by id.
    pub fn load_pending(&self, kind: ComponentKind) -> anyhow::Result<Vec<(String, String)>> {
        self.load_with_suffix(kind, &format!("{}.{PENDING_SUFFIX}", kind.ext()))
    }

    fn load_with_suffix(
        &self,
        kind: ComponentKind,
        suffix: &str,
    ) -> anyhow::Result<Vec<(String, String)>> {
        let pattern = self.root.join(kind.dir()).join(format!("*.{suffix}"));
        let dot_suffix = format!(".{suffix}");
        let mut out = Vec::new();
        for entry in glob::glob(&pattern.to_string_lossy())? {
            let path = entry?;
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(id) = name.strip_suffix(&dot_suffix) else {
                continue;
            };
            // A formal glob like `*.yaml` also matches `x.yaml.new`; skip those.
            if id.contains('.') {
                continue;
            }
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| anyhow::anyhow!("read {}: {e}", path.display()))?;
            out.push((id.to_string(), raw));
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }

    // -- writes -------------------------------------------------------------

    /// Write a pending artifact (`<id>.<ext>.new`).
    pub fn write_pending(&self, kind: ComponentKind, id: &str, raw: &str) -> anyhow::Result<()> {
        Self::validate_id(id)?;
        write_atomic(&self.pending_path(kind, id), raw)
    }

    /// Write a formal artifact directly (used by follower sync, which never
    /// stages pending versions).
    pub fn write_formal(&self, kind: ComponentKind, id: &str, raw: &str) -> anyhow::Result<()> {
        Self::validate_id(id)?;
        write_atomic(&self.formal_path(kind, id), raw)
    }

    /// Promote `<id>.<ext>.new` over `<id>.<ext>`. No-op if no pending file
    /// exists.
    pub fn promote(&self, kind: ComponentKind, id: &str) -> anyhow::Result<()> {
        let pending = self.pending_path(kind, id);
        if pending.exists() {
            std::fs::rename(&pending, self.formal_path(kind, id))
                .map_err(|e| anyhow::anyhow!("promote {}: {e}", pending.display()))?;
        }
        Ok(())
    }

    /// Drop the pending artifact, keeping the formal one.
    pub fn discard_pending(&self, kind: ComponentKind, id: &str) -> anyhow::Result<()> {
        let pending = self.pending_path(kind, id);
        if pending.exists() {
            std::fs::remove_file(&pending)
                .map_err(|e| anyhow::anyhow!("discard {}: {e}", pending.display()))?;
        }
        Ok(())
    }

    /// Remove both formal and pending artifacts.
    pub fn remove(&self, kind: ComponentKind, id: &str) -> anyhow::Result<()> {
        for path in [self.formal_path(kind, id), self.pending_path(kind, id)] {
            if path.exists() {
                std::fs::remove_file(&path)
                    .map_err(|e| anyhow::anyhow!("remove {}: {e}", path.display()))?;
            }
        }
        Ok(())
    }

    // -- snapshot -----------------------------------------------------------

    /// Collect every formal artifact as `kind/<file> → bytes`, for the config
    /// download endpoint. Pending files are editor state and are excluded.
    pub fn snapshot(&self) -> anyhow::Result<BTreeMap<String, Vec<u8>>> {
        let mut files = BTreeMap::new();
        for kind in ComponentKind::ALL {
            for (id, raw) in self.load_formal(kind)? {
                let rel = format!("{}/{id}.{}", kind.dir(), kind.ext());
                files.insert(rel, raw.into_bytes());
            }
        }
        Ok(files)
    }
}

/// Write `content` to a sibling temp file, then rename into place.
fn write_atomic(path: &Path, content: &str) -> anyhow::Result<()> {
    let tmp = path.with_extension(format!(
        "{}.tmp",
        path.extension().and_then(|e| e.to_str()).unwrap_or("tmp")
    ));
    std::fs::write(&tmp, content).map_err(|e| anyhow::anyhow!("write {}: {e}", tmp.display()))?;
    std::fs::rename(&tmp, path).map_err(|e| anyhow::anyhow!("rename {}: {e}", path.display()))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, ArtifactStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn pending_lifecycle() {
        let (_dir, store) = store();
        store
            .write_pending(ComponentKind::Input, "k1", "type: print\n")
            .unwrap();
        assert_eq!(store.load_pending(ComponentKind::Input).unwrap().len(), 1);
        assert!(store.load_formal(ComponentKind::Input).unwrap().is_empty());

        store.promote(ComponentKind::Input, "k1").unwrap();
        assert!(store.load_pending(ComponentKind::Input).unwrap().is_empty());
        let formal = store.load_formal(ComponentKind::Input).unwrap();
        assert_eq!(formal, vec![("k1".to_string(), "type: print\n".to_string())]);
    }

    #[test]
    fn discard_keeps_formal() {
        let (_dir, store) = store();
        store
            .write_formal(ComponentKind::Output, "o1", "v1")
            .unwrap();
        store
            .write_pending(ComponentKind::Output, "o1", "v2")
            .unwrap();
        store.discard_pending(ComponentKind::Output, "o1").unwrap();
        let formal = store.load_formal(ComponentKind::Output).unwrap();
        assert_eq!(formal[0].1, "v1");
        assert!(store.load_pending(ComponentKind::Output).unwrap().is_empty());
    }

    #[test]
    fn formal_listing_skips_pending_files() {
        let (_dir, store) = store();
        store
            .write_pending(ComponentKind::Ruleset, "r1", "<root/>")
            .unwrap();
        assert!(store.load_formal(ComponentKind::Ruleset).unwrap().is_empty());
    }

    #[test]
    fn remove_clears_both() {
        let (_dir, store) = store();
        store.write_formal(ComponentKind::Project, "p", "a").unwrap();
        store.write_pending(ComponentKind::Project, "p", "b").unwrap();
        store.remove(ComponentKind::Project, "p").unwrap();
        assert!(store.load_formal(ComponentKind::Project).unwrap().is_empty());
        assert!(store.load_pending(ComponentKind::Project).unwrap().is_empty());
    }

    #[test]
    fn reject_bad_ids() {
        assert!(ArtifactStore::validate_id("ok_id-1").is_ok());
        assert!(ArtifactStore::validate_id("../escape").is_err());
        assert!(ArtifactStore::validate_id("a/b").is_err());
        assert!(ArtifactStore::validate_id("").is_err());
        assert!(ArtifactStore::validate_id("dotted.name").is_err());
    }

    #[test]
    fn snapshot_collects_formal_only() {
        let (_dir, store) = store();
        store.write_formal(ComponentKind::Input, "i", "x").unwrap();
        store.write_pending(ComponentKind::Input, "j", "y").unwrap();
        let snap = store.snapshot().unwrap();
        assert_eq!(snap.len(), 1);
        assert!(snap.contains_key("input/i.yaml"));
    }
}
