use std::path::Path;

use anyhow::{Context, Result};
use rocksdb::{
    ColumnFamily,
    ColumnFamilyDescriptor,
    Options as RocksDBOptions,
    TransactionDB,
    TransactionDBOptions,
};
use strum::{AsRefStr, EnumIter, IntoEnumIterator};

use crate::data_model::{MigrationJob, Principal, StateMachineMetadata};

const DB_VERSION: u64 = 1;
const SM_META_KEY: &[u8] = b"sm_meta";

#[derive(Debug, Clone, Copy, AsRefStr, EnumIter)]
pub enum StateColumns {
    #[strum(serialize = "migration_jobs")]
    MigrationJobs,
    #[strum(serialize = "principals")]
    Principals,
    #[strum(serialize = "state_machine_metadata")]
    StateMachineMetadata,
}

/// Durable store for the two tables this system persists: migration jobs
/// (with their embedded file transfers) and principals. The object catalog
/// is volatile and rebuilt by refresh. Records are stored as JSON, one row
/// per job or principal, keyed by id.
pub struct StateStore {
    db: TransactionDB,
}

impl StateStore {
    pub fn open(path: &Path) -> Result<Self> {
        let mut db_opts = RocksDBOptions::default();
        db_opts.create_missing_column_families(true);
        db_opts.create_if_missing(true);

        let column_families = StateColumns::iter()
            .map(|cf| ColumnFamilyDescriptor::new(cf.as_ref(), RocksDBOptions::default()));

        let db = TransactionDB::open_cf_descriptors(
            &db_opts,
            &TransactionDBOptions::default(),
            path,
            column_families,
        )
        .with_context(|| format!("failed to open state store at {}", path.display()))?;

        let store = Self { db };
        store.ensure_metadata()?;
        Ok(store)
    }

    fn cf(&self, column: StateColumns) -> &ColumnFamily {
        self.db
            .cf_handle(column.as_ref())
            .unwrap_or_else(|| panic!("missing column family {}", column.as_ref()))
    }

    fn ensure_metadata(&self) -> Result<()> {
        if self.metadata()?.is_none() {
            let meta = StateMachineMetadata {
                db_version: DB_VERSION,
            };
            let record =
                serde_json::to_vec(&meta).context("could not serialize state store metadata")?;
            self.db
                .put_cf(self.cf(StateColumns::StateMachineMetadata), SM_META_KEY, record)
                .context("failed to write state store metadata")?;
        }
        Ok(())
    }

    pub fn metadata(&self) -> Result<Option<StateMachineMetadata>> {
        let bytes = self
            .db
            .get_cf(self.cf(StateColumns::StateMachineMetadata), SM_META_KEY)?;
        bytes
            .map(|b| {
                serde_json::from_slice(&b).context("state store metadata record is corrupt")
            })
            .transpose()
    }

    /// Persists the job and its embedded file transfers. Called on every
    /// job and file transition, so a restart resumes from the last one.
    pub fn upsert_job(&self, job: &MigrationJob) -> Result<()> {
        let record = serde_json::to_vec(job)
            .with_context(|| format!("could not serialize migration job {}", job.id))?;
        self.db
            .put_cf(self.cf(StateColumns::MigrationJobs), job.id.as_bytes(), record)
            .with_context(|| format!("failed to persist migration job {}", job.id))
    }

    pub fn get_job(&self, id: &str) -> Result<Option<MigrationJob>> {
        let bytes = self
            .db
            .get_cf(self.cf(StateColumns::MigrationJobs), id.as_bytes())?;
        bytes
            .map(|b| {
                serde_json::from_slice(&b)
                    .with_context(|| format!("migration job record {id} is corrupt"))
            })
            .transpose()
    }

    pub fn delete_job(&self, id: &str) -> Result<()> {
        self.db
            .delete_cf(self.cf(StateColumns::MigrationJobs), id.as_bytes())
            .with_context(|| format!("failed to delete migration job {id}"))
    }

    pub fn all_jobs(&self) -> Result<Vec<MigrationJob>> {
        let mut jobs = Vec::new();
        for item in self
            .db
            .iterator_cf(self.cf(StateColumns::MigrationJobs), rocksdb::IteratorMode::Start)
        {
            let (key, value) = item?;
            let job: MigrationJob = serde_json::from_slice(&value).with_context(|| {
                format!(
                    "migration job record {} is corrupt",
                    String::from_utf8_lossy(&key)
                )
            })?;
            jobs.push(job);
        }
        Ok(jobs)
    }

    /// Creates a principal iff the id is unused. Runs in a transaction so
    /// two concurrent registrations of the same id cannot both succeed.
    pub fn create_principal(&self, principal: &Principal) -> Result<bool> {
        let record = serde_json::to_vec(principal)
            .with_context(|| format!("could not serialize principal {}", principal.id))?;
        let txn = self.db.transaction();
        let cf = self.cf(StateColumns::Principals);
        let existing = txn.get_for_update_cf(cf, principal.id.as_bytes(), true)?;
        if existing.is_some() {
            return Ok(false);
        }
        txn.put_cf(cf, principal.id.as_bytes(), record)?;
        txn.commit()
            .with_context(|| format!("failed to persist principal {}", principal.id))?;
        Ok(true)
    }

    pub fn principal_count(&self) -> Result<usize> {
        let mut count = 0usize;
        for item in self
            .db
            .iterator_cf(self.cf(StateColumns::Principals), rocksdb::IteratorMode::Start)
        {
            item?;
            count += 1;
        }
        Ok(count)
    }

    pub fn get_principal(&self, id: &str) -> Result<Option<Principal>> {
        let bytes = self
            .db
            .get_cf(self.cf(StateColumns::Principals), id.as_bytes())?;
        bytes
            .map(|b| {
                serde_json::from_slice(&b)
                    .with_context(|| format!("principal record {id} is corrupt"))
            })
            .transpose()
    }

    pub fn upsert_principal(&self, principal: &Principal) -> Result<()> {
        let record = serde_json::to_vec(principal)
            .with_context(|| format!("could not serialize principal {}", principal.id))?;
        self.db
            .put_cf(self.cf(StateColumns::Principals), principal.id.as_bytes(), record)
            .with_context(|| format!("failed to persist principal {}", principal.id))
    }
}
