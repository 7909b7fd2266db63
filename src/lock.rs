//! Inter-process lock protocol with stale-owner detection (C4).

use crate::backend::Backend;
use crate::error::{Result, ScdbError};
use crate::identifier::Identifier;

/// Acquire the exclusive write lock on `target`.
///
/// Returns `Ok(true)` once this process holds the lock (either because it
/// just acquired it, or because it already owned it), `Ok(false)` if
/// another live process holds it.
///
/// # Errors
///
/// Returns `StaleLock` if the recorded owner's pid is not alive — this is
/// always fatal and requires manual removal of the lock row, per the
/// doctrine that silently stealing a stale lock risks corrupting a table a
/// crashed writer left mid-update. Propagates `Backend` for any other
/// underlying failure.
pub fn lock_table(backend: &dyn Backend, target: &Identifier, schema: &str) -> Result<bool> {
    backend.ensure_locks_table(schema)?;

    let pid = backend.pid();
    let owner = backend.owner_name();

    // Step 2: attempt insert-if-absent. On backends without real upsert
    // semantics, race safety comes from the primary key rejecting a second
    // insert, which `insert_lock_if_absent` turns into `Ok(false)` rather
    // than an error.
    let inserted = backend.insert_lock_if_absent(schema, &target.table, &owner, pid)?;
    if inserted {
        return Ok(true);
    }

    // Step 3: read the current owner.
    let current = backend.read_lock_owner(schema, &target.table)?;
    let Some(current) = current else {
        // The row vanished between our insert attempt and the read (another
        // process unlocked concurrently); treat as not held and let the
        // caller retry.
        return Ok(false);
    };

    if current.pid == pid {
        return Ok(true);
    }

    // Step 4: query the OS for liveness of the owning pid.
    if backend.process_alive(current.pid) {
        Ok(false)
    } else {
        Err(ScdbError::StaleLock {
            schema: schema.to_string(),
            table: target.table.clone(),
            user: current.user,
            pid: current.pid,
        })
    }
}

/// Release the lock on `target` held by `pid` (defaults to the current
/// process). Silently a no-op if the `locks` table doesn't exist or no
/// matching row is held.
///
/// # Errors
///
/// Propagates `Backend` on any underlying failure other than "the `locks`
/// table doesn't exist yet", which is treated as already-unlocked.
pub fn unlock_table(
    backend: &dyn Backend,
    target: &Identifier,
    schema: &str,
    pid: Option<u32>,
) -> Result<()> {
    if !backend.locks_table_exists(schema)? {
        return Ok(());
    }
    let pid = pid.unwrap_or_else(|| backend.pid());
    backend.delete_lock(schema, &target.table, pid)
}

/// RAII guard releasing the lock on `target` when dropped, so every exit
/// path of a reconciliation call (success, error, panic unwind) unlocks.
pub struct LockGuard<'b> {
    backend: &'b dyn Backend,
    target: Identifier,
    schema: String,
    released: bool,
}

impl<'b> LockGuard<'b> {
    /// Acquire the lock on `target`, returning a guard on success.
    ///
    /// # Errors
    /// `LockBusy` if another live process holds it, `StaleLock` if the
    /// owner is dead, or `Backend` for underlying failures.
    pub fn acquire(backend: &'b dyn Backend, target: &Identifier, schema: &str) -> Result<Self> {
        if lock_table(backend, target, schema)? {
            Ok(Self {
                backend,
                target: target.clone(),
                schema: schema.to_string(),
                released: false,
            })
        } else {
            Err(ScdbError::LockBusy {
                schema: schema.to_string(),
                table: target.table.clone(),
            })
        }
    }

    /// Release the lock now, surfacing any error instead of swallowing it
    /// in `Drop`.
    ///
    /// # Errors
    /// Propagates `Backend` on any underlying failure.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        unlock_table(self.backend, &self.target, &self.schema, None)
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if !self.released {
            let _ = unlock_table(self.backend, &self.target, &self.schema, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::SqliteBackend;

    #[test]
    fn second_acquire_from_same_process_succeeds() {
        let backend = SqliteBackend::open_memory().unwrap();
        let target = Identifier::parse("mtcars").unwrap();
        assert!(lock_table(&backend, &target, "main").unwrap());
        assert!(lock_table(&backend, &target, "main").unwrap());
    }

    #[test]
    fn unlock_then_relock_succeeds() {
        let backend = SqliteBackend::open_memory().unwrap();
        let target = Identifier::parse("mtcars").unwrap();
        assert!(lock_table(&backend, &target, "main").unwrap());
        unlock_table(&backend, &target, "main", None).unwrap();
        assert!(lock_table(&backend, &target, "main").unwrap());
    }

    #[test]
    fn guard_releases_on_drop() {
        let backend = SqliteBackend::open_memory().unwrap();
        let target = Identifier::parse("mtcars").unwrap();
        {
            let _guard = LockGuard::acquire(&backend, &target, "main").unwrap();
        }
        // Lock was released when the guard dropped.
        assert!(lock_table(&backend, &target, "main").unwrap());
    }

    #[test]
    fn stale_lock_is_fatal() {
        let backend = SqliteBackend::open_memory().unwrap();
        let target = Identifier::parse("mtcars").unwrap();
        backend.ensure_locks_table("main").unwrap();
        // Plant a lock row owned by a pid that cannot possibly be alive.
        let dead_pid = i32::MAX as u32 - 1;
        backend
            .insert_lock_if_absent("main", &target.table, "ghost", dead_pid)
            .unwrap();

        let err = lock_table(&backend, &target, "main").unwrap_err();
        match err {
            ScdbError::StaleLock { pid, .. } => assert_eq!(pid, dead_pid),
            other => panic!("expected StaleLock, got {other:?}"),
        }
    }
}
