use crate::model::SpeedTestResult;
use anyhow::{anyhow, bail, Context, Result};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use time::format_description::well_known::Rfc3339;

/// Durable map of results keyed by ID, with lookup by owning user.
///
/// Saving a result whose ID already exists replaces it.
pub trait ResultStore: Send + Sync {
    fn save_result(&self, result: &SpeedTestResult) -> Result<()>;
    fn results_by_user(&self, user_id: &str) -> Result<Vec<SpeedTestResult>>;
    fn result_by_id(&self, id: &str) -> Result<SpeedTestResult>;
    fn delete_result(&self, id: &str) -> Result<()>;
}

#[derive(Default)]
struct MemoryInner {
    by_id: HashMap<String, SpeedTestResult>,
    by_user: HashMap<String, BTreeSet<String>>,
}

/// Process-local store, lost on exit.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_inner<T>(&self, f: impl FnOnce(&mut MemoryInner) -> T) -> Result<T> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))?;
        Ok(f(&mut inner))
    }
}

impl ResultStore for MemoryStore {
    fn save_result(&self, result: &SpeedTestResult) -> Result<()> {
        self.with_inner(|inner| {
            if let Some(old) = inner.by_id.insert(result.id.clone(), result.clone()) {
                if let Some(ids) = inner.by_user.get_mut(&old.user_id) {
                    ids.remove(&old.id);
                }
            }
            inner
                .by_user
                .entry(result.user_id.clone())
                .or_default()
                .insert(result.id.clone());
        })
    }

    fn results_by_user(&self, user_id: &str) -> Result<Vec<SpeedTestResult>> {
        self.with_inner(|inner| {
            inner
                .by_user
                .get(user_id)
                .map(|ids| {
                    ids.iter()
                        .filter_map(|id| inner.by_id.get(id).cloned())
                        .collect()
                })
                .unwrap_or_default()
        })
    }

    fn result_by_id(&self, id: &str) -> Result<SpeedTestResult> {
        self.with_inner(|inner| inner.by_id.get(id).cloned())?
            .ok_or_else(|| anyhow!("result not found: {id}"))
    }

    fn delete_result(&self, id: &str) -> Result<()> {
        self.with_inner(|inner| {
            if let Some(old) = inner.by_id.remove(id) {
                if let Some(ids) = inner.by_user.get_mut(&old.user_id) {
                    ids.remove(id);
                }
            }
        })
    }
}

/// One pretty-printed JSON file per result, `<dir>/<id>.json`.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `<local data dir>/speedtest-backend/results`, or `./results` when the
    /// platform has no data dir.
    pub fn default_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("speedtest-backend")
            .join("results")
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn ensure_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir).context("create results dir")
    }

    fn path_for(&self, id: &str) -> Result<PathBuf> {
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            bail!("invalid result id: {id:?}");
        }
        Ok(self.dir.join(format!("{id}.json")))
    }

    fn read(path: &Path) -> Result<SpeedTestResult> {
        let data = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
        serde_json::from_slice(&data).with_context(|| format!("parse {}", path.display()))
    }
}

impl ResultStore for FileStore {
    fn save_result(&self, result: &SpeedTestResult) -> Result<()> {
        self.ensure_dir()?;
        let path = self.path_for(&result.id)?;
        let data = serde_json::to_vec_pretty(result)?;
        std::fs::write(&path, data).context("write result json")?;
        Ok(())
    }

    fn results_by_user(&self, user_id: &str) -> Result<Vec<SpeedTestResult>> {
        self.ensure_dir()?;
        let mut out = Vec::new();
        for e in std::fs::read_dir(&self.dir).context("read results dir")? {
            let p = e?.path();
            if p.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let r = Self::read(&p)?;
            if r.user_id == user_id {
                out.push(r);
            }
        }
        Ok(out)
    }

    fn result_by_id(&self, id: &str) -> Result<SpeedTestResult> {
        let path = self.path_for(id)?;
        if !path.exists() {
            bail!("result not found: {id}");
        }
        Self::read(&path)
    }

    fn delete_result(&self, id: &str) -> Result<()> {
        let path = self.path_for(id)?;
        if path.exists() {
            std::fs::remove_file(&path).context("delete result file")?;
        }
        Ok(())
    }
}

pub fn export_json(path: &Path, result: &SpeedTestResult) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).context("create export directory")?;
    }
    let data = serde_json::to_vec_pretty(result)?;
    std::fs::write(path, data).context("write export json")?;
    Ok(())
}

pub fn export_csv(path: &Path, results: &[SpeedTestResult]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).context("create export directory")?;
    }
    let mut out = String::new();
    out.push_str(
        "id,user_id,created_at,download_mbps,upload_mbps,ping_ms,jitter,isp,ip_address,country,region\n",
    );
    for r in results {
        let created_at = r.created_at.format(&Rfc3339).context("format created_at")?;
        out.push_str(&format!(
            "{},{},{},{:.3},{:.3},{:.3},{:.3},{},{},{},{}\n",
            csv_escape(&r.id),
            csv_escape(&r.user_id),
            created_at,
            r.download_speed,
            r.upload_speed,
            r.ping,
            r.jitter,
            csv_escape(&r.isp),
            csv_escape(&r.ip_address),
            csv_escape(&r.country),
            csv_escape(&r.region),
        ));
    }
    std::fs::write(path, out).context("write export csv")?;
    Ok(())
}

/// Escape a string for CSV format (handles commas, quotes, and newlines).
fn csv_escape(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}
