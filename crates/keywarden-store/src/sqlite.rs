//! SQLite implementation of the Store trait.
//!
//! The primary storage backend. It uses rusqlite with bundled SQLite,
//! wrapped in async via tokio::spawn_blocking. Envelope values and share
//! process records are stored as CBOR blobs.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, ToSql, Transaction};
use serde::{de::DeserializeOwned, Serialize};
use uuid::Uuid;

use keywarden_core::{
    now_millis, Grant, GrantOrigin, Group, GroupId, GroupMember, Resource, ResourceId,
    ResourceKey, ResourceKind, ShareProcess, ShareProcessId, ShareStatus, User, UserId, UserKeys,
};
use keywarden_envelope::X25519PublicKey;

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{CommitResult, GrantCommit, Store, VersionedGrants};

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a blocking closure against the connection on the blocking pool.
    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(|_| StoreError::Poisoned)?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Runtime(e.to_string()))?
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Encoding helpers
// ─────────────────────────────────────────────────────────────────────────────

fn to_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf)?;
    Ok(buf)
}

fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(ciborium::from_reader(bytes)?)
}

fn decode_id<T: From<Uuid>>(bytes: &[u8], column: &str) -> Result<T> {
    Uuid::from_slice(bytes)
        .map(T::from)
        .map_err(|_| StoreError::InvalidData(format!("bad id in column {}", column)))
}

fn decode_opt_id<T: From<Uuid>>(bytes: Option<Vec<u8>>, column: &str) -> Result<Option<T>> {
    bytes.map(|b| decode_id(&b, column)).transpose()
}

/// Map a unique-constraint failure to `Duplicate`.
fn duplicate_on_constraint(what: String) -> impl FnOnce(rusqlite::Error) -> StoreError {
    move |e| match &e {
        rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation => {
            StoreError::Duplicate(what)
        }
        _ => StoreError::Database(e),
    }
}

type UserRow = (Vec<u8>, String, Option<Vec<u8>>, Option<Vec<u8>>, Option<Vec<u8>>);

fn decode_user(row: UserRow) -> Result<User> {
    let (id, email, public_key, sealed, private_group) = row;
    let keys = match (public_key, sealed) {
        (Some(pk), Some(sealed)) => Some(UserKeys {
            public_key: X25519PublicKey::from_slice(&pk)
                .map_err(|e| StoreError::InvalidData(e.to_string()))?,
            sealed_private_key: from_cbor(&sealed)?,
        }),
        (None, None) => None,
        _ => {
            return Err(StoreError::InvalidData(
                "user has only half of a keypair".into(),
            ))
        }
    };
    Ok(User {
        id: decode_id(&id, "user_id")?,
        email,
        keys,
        private_group_id: decode_opt_id(private_group, "private_group_id")?,
    })
}

type GroupRow = (Vec<u8>, String, bool, Vec<u8>);

fn decode_group(row: GroupRow) -> Result<Group> {
    let (id, name, private, public_key) = row;
    Ok(Group {
        id: decode_id(&id, "group_id")?,
        name,
        private,
        public_key: X25519PublicKey::from_slice(&public_key)
            .map_err(|e| StoreError::InvalidData(e.to_string()))?,
    })
}

type MemberRow = (Vec<u8>, Vec<u8>, Vec<u8>, bool);

fn decode_member(row: MemberRow) -> Result<GroupMember> {
    let (group_id, user_id, wrapped, is_manager) = row;
    Ok(GroupMember {
        group_id: decode_id(&group_id, "group_id")?,
        user_id: decode_id(&user_id, "user_id")?,
        wrapped_group_key: from_cbor(&wrapped)?,
        is_manager,
    })
}

type ResourceRow = (Vec<u8>, String, Option<Vec<u8>>, Option<Vec<u8>>);

fn decode_resource(row: ResourceRow) -> Result<Resource> {
    let (id, kind, vault_id, folder_id) = row;
    Ok(Resource {
        id: decode_id(&id, "resource_id")?,
        kind: ResourceKind::parse(&kind)
            .ok_or_else(|| StoreError::InvalidData(format!("unknown resource kind {}", kind)))?,
        vault_id: decode_opt_id(vault_id, "vault_id")?,
        folder_id: decode_opt_id(folder_id, "folder_id")?,
    })
}

fn decode_grant(resource_id: ResourceId, row: (Vec<u8>, bool, bool)) -> Result<Grant> {
    let (group_id, can_write, partial) = row;
    Ok(Grant::new(
        resource_id,
        decode_id(&group_id, "group_id")?,
        can_write,
        GrantOrigin::from_partial(partial),
    ))
}

fn decode_key(resource_id: ResourceId, row: (Vec<u8>, Vec<u8>)) -> Result<ResourceKey> {
    let (group_id, wrapped) = row;
    Ok(ResourceKey {
        resource_id,
        group_id: decode_id(&group_id, "group_id")?,
        wrapped: from_cbor(&wrapped)?,
    })
}

fn insert_process(tx: &Transaction<'_>, process: &ShareProcess) -> Result<()> {
    tx.execute(
        "INSERT INTO share_processes (process_id, target_id, status, created_at, record)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            process.id.as_bytes().as_slice(),
            process.target_id.as_bytes().as_slice(),
            process.status.as_str(),
            process.created_at,
            to_cbor(process)?,
        ],
    )?;
    Ok(())
}

fn write_process(conn: &Connection, process: &ShareProcess) -> Result<()> {
    conn.execute(
        "UPDATE share_processes SET status = ?2, record = ?3 WHERE process_id = ?1",
        params![
            process.id.as_bytes().as_slice(),
            process.status.as_str(),
            to_cbor(process)?,
        ],
    )?;
    Ok(())
}

fn query_processes(conn: &Connection, sql: &str, key: &dyn ToSql) -> Result<Vec<ShareProcess>> {
    let mut stmt = conn.prepare(sql)?;
    let blobs = stmt
        .query_map([key], |row| row.get::<_, Vec<u8>>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    blobs.iter().map(|b| from_cbor(b)).collect()
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert_user(&self, user: &User) -> Result<()> {
        let user = user.clone();
        self.run(move |conn| {
            let sealed = user
                .keys
                .as_ref()
                .map(|k| to_cbor(&k.sealed_private_key))
                .transpose()?;
            conn.execute(
                "INSERT INTO users (user_id, email, public_key, sealed_private_key, private_group_id)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    user.id.as_bytes().as_slice(),
                    user.email,
                    user.keys.as_ref().map(|k| k.public_key.as_bytes().to_vec()),
                    sealed,
                    user.private_group_id.map(|g| g.as_bytes().to_vec()),
                ],
            )
            .map_err(duplicate_on_constraint(format!("user {} / {}", user.id, user.email)))?;
            Ok(())
        })
        .await
    }

    async fn get_user(&self, id: &UserId) -> Result<Option<User>> {
        let id = *id;
        self.run(move |conn| {
            let row: Option<UserRow> = conn
                .query_row(
                    "SELECT user_id, email, public_key, sealed_private_key, private_group_id
                     FROM users WHERE user_id = ?1",
                    params![id.as_bytes().as_slice()],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
                )
                .optional()?;
            row.map(decode_user).transpose()
        })
        .await
    }

    async fn insert_group(&self, group: &Group, first_member: &GroupMember) -> Result<()> {
        if first_member.group_id != group.id {
            return Err(StoreError::InvalidData(
                "first member belongs to another group".into(),
            ));
        }
        let group = group.clone();
        let member = first_member.clone();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO access_groups (group_id, name, private, public_key) VALUES (?1, ?2, ?3, ?4)",
                params![
                    group.id.as_bytes().as_slice(),
                    group.name,
                    group.private,
                    group.public_key.as_bytes().as_slice(),
                ],
            )
            .map_err(duplicate_on_constraint(format!("group {}", group.id)))?;
            tx.execute(
                "INSERT INTO group_members (group_id, user_id, wrapped_group_key, is_manager)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    member.group_id.as_bytes().as_slice(),
                    member.user_id.as_bytes().as_slice(),
                    to_cbor(&member.wrapped_group_key)?,
                    member.is_manager,
                ],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn get_group(&self, id: &GroupId) -> Result<Option<Group>> {
        let id = *id;
        self.run(move |conn| {
            let row: Option<GroupRow> = conn
                .query_row(
                    "SELECT group_id, name, private, public_key FROM access_groups WHERE group_id = ?1",
                    params![id.as_bytes().as_slice()],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                )
                .optional()?;
            row.map(decode_group).transpose()
        })
        .await
    }

    async fn insert_member(&self, member: &GroupMember) -> Result<()> {
        let member = member.clone();
        self.run(move |conn| {
            let exists: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM access_groups WHERE group_id = ?1",
                    params![member.group_id.as_bytes().as_slice()],
                    |row| row.get(0),
                )
                .optional()?;
            if exists.is_none() {
                return Err(StoreError::NotFound(format!("group {}", member.group_id)));
            }
            conn.execute(
                "INSERT INTO group_members (group_id, user_id, wrapped_group_key, is_manager)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    member.group_id.as_bytes().as_slice(),
                    member.user_id.as_bytes().as_slice(),
                    to_cbor(&member.wrapped_group_key)?,
                    member.is_manager,
                ],
            )
            .map_err(duplicate_on_constraint(format!(
                "member {} of {}",
                member.user_id, member.group_id
            )))?;
            Ok(())
        })
        .await
    }

    async fn delete_member(&self, group_id: &GroupId, user_id: &UserId) -> Result<()> {
        let (group_id, user_id) = (*group_id, *user_id);
        self.run(move |conn| {
            let deleted = conn.execute(
                "DELETE FROM group_members WHERE group_id = ?1 AND user_id = ?2",
                params![group_id.as_bytes().as_slice(), user_id.as_bytes().as_slice()],
            )?;
            if deleted == 0 {
                return Err(StoreError::NotFound(format!(
                    "member {} of {}",
                    user_id, group_id
                )));
            }
            Ok(())
        })
        .await
    }

    async fn get_member(&self, group_id: &GroupId, user_id: &UserId) -> Result<Option<GroupMember>> {
        let (group_id, user_id) = (*group_id, *user_id);
        self.run(move |conn| {
            let row: Option<MemberRow> = conn
                .query_row(
                    "SELECT group_id, user_id, wrapped_group_key, is_manager
                     FROM group_members WHERE group_id = ?1 AND user_id = ?2",
                    params![group_id.as_bytes().as_slice(), user_id.as_bytes().as_slice()],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                )
                .optional()?;
            row.map(decode_member).transpose()
        })
        .await
    }

    async fn list_members(&self, group_id: &GroupId) -> Result<Vec<GroupMember>> {
        let group_id = *group_id;
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT group_id, user_id, wrapped_group_key, is_manager
                 FROM group_members WHERE group_id = ?1 ORDER BY user_id",
            )?;
            let rows = stmt
                .query_map(params![group_id.as_bytes().as_slice()], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                })?
                .collect::<rusqlite::Result<Vec<MemberRow>>>()?;
            rows.into_iter().map(decode_member).collect()
        })
        .await
    }

    async fn list_user_groups(&self, user_id: &UserId) -> Result<Vec<GroupId>> {
        let user_id = *user_id;
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT group_id FROM group_members WHERE user_id = ?1 ORDER BY group_id",
            )?;
            let rows = stmt
                .query_map(params![user_id.as_bytes().as_slice()], |row| {
                    row.get::<_, Vec<u8>>(0)
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.iter().map(|b| decode_id(b, "group_id")).collect()
        })
        .await
    }

    async fn insert_resource(
        &self,
        resource: &Resource,
        grants: &[Grant],
        keys: &[ResourceKey],
    ) -> Result<()> {
        let resource = resource.clone();
        let grants = grants.to_vec();
        let keys = keys.to_vec();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO resources (resource_id, kind, vault_id, folder_id, grants_version)
                 VALUES (?1, ?2, ?3, ?4, 0)",
                params![
                    resource.id.as_bytes().as_slice(),
                    resource.kind.as_str(),
                    resource.vault_id.map(|id| id.as_bytes().to_vec()),
                    resource.folder_id.map(|id| id.as_bytes().to_vec()),
                ],
            )
            .map_err(duplicate_on_constraint(format!("resource {}", resource.id)))?;
            for grant in &grants {
                tx.execute(
                    "INSERT INTO grants (resource_id, group_id, can_write, partial) VALUES (?1, ?2, ?3, ?4)",
                    params![
                        resource.id.as_bytes().as_slice(),
                        grant.group_id.as_bytes().as_slice(),
                        grant.can_write,
                        grant.is_partial(),
                    ],
                )?;
            }
            for key in &keys {
                tx.execute(
                    "INSERT INTO resource_keys (resource_id, group_id, wrapped) VALUES (?1, ?2, ?3)",
                    params![
                        resource.id.as_bytes().as_slice(),
                        key.group_id.as_bytes().as_slice(),
                        to_cbor(&key.wrapped)?,
                    ],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn get_resource(&self, id: &ResourceId) -> Result<Option<Resource>> {
        let id = *id;
        self.run(move |conn| {
            let row: Option<ResourceRow> = conn
                .query_row(
                    "SELECT resource_id, kind, vault_id, folder_id FROM resources WHERE resource_id = ?1",
                    params![id.as_bytes().as_slice()],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                )
                .optional()?;
            row.map(decode_resource).transpose()
        })
        .await
    }

    async fn list_descendants(&self, id: &ResourceId) -> Result<Vec<Resource>> {
        let id = *id;
        self.run(move |conn| {
            let kind: Option<String> = conn
                .query_row(
                    "SELECT kind FROM resources WHERE resource_id = ?1",
                    params![id.as_bytes().as_slice()],
                    |row| row.get(0),
                )
                .optional()?;
            let column = match kind.as_deref().and_then(ResourceKind::parse) {
                Some(ResourceKind::Vault) => "vault_id",
                Some(ResourceKind::Folder) => "folder_id",
                _ => return Ok(Vec::new()),
            };

            let sql = format!(
                "SELECT resource_id, kind, vault_id, folder_id FROM resources
                 WHERE {} = ?1
                 ORDER BY CASE kind WHEN 'folder' THEN 0 ELSE 1 END, rowid",
                column
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![id.as_bytes().as_slice()], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                })?
                .collect::<rusqlite::Result<Vec<ResourceRow>>>()?;
            rows.into_iter().map(decode_resource).collect()
        })
        .await
    }

    async fn get_grants(&self, resource_id: &ResourceId) -> Result<VersionedGrants> {
        let resource_id = *resource_id;
        self.run(move |conn| {
            let version: Option<i64> = conn
                .query_row(
                    "SELECT grants_version FROM resources WHERE resource_id = ?1",
                    params![resource_id.as_bytes().as_slice()],
                    |row| row.get(0),
                )
                .optional()?;
            let version =
                version.ok_or_else(|| StoreError::NotFound(format!("resource {}", resource_id)))?;

            let mut stmt = conn.prepare(
                "SELECT group_id, can_write, partial FROM grants WHERE resource_id = ?1 ORDER BY group_id",
            )?;
            let rows = stmt
                .query_map(params![resource_id.as_bytes().as_slice()], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                })?
                .collect::<rusqlite::Result<Vec<(Vec<u8>, bool, bool)>>>()?;
            let grants = rows
                .into_iter()
                .map(|row| decode_grant(resource_id, row))
                .collect::<Result<Vec<_>>>()?;

            Ok(VersionedGrants {
                grants,
                version: version as u64,
            })
        })
        .await
    }

    async fn commit_grants(&self, commit: GrantCommit) -> Result<CommitResult> {
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let resource_id = commit.resource_id;
            let rid = resource_id.as_bytes().to_vec();

            if let Some(process_id) = commit.require_running {
                let status: Option<String> = tx
                    .query_row(
                        "SELECT status FROM share_processes WHERE process_id = ?1",
                        params![process_id.as_bytes().as_slice()],
                        |row| row.get(0),
                    )
                    .optional()?;
                if status.as_deref() != Some(ShareStatus::Running.as_str()) {
                    return Err(StoreError::Superseded(process_id));
                }
            }

            let actual: Option<i64> = tx
                .query_row(
                    "SELECT grants_version FROM resources WHERE resource_id = ?1",
                    params![rid],
                    |row| row.get(0),
                )
                .optional()?;
            let actual = actual
                .ok_or_else(|| StoreError::NotFound(format!("resource {}", resource_id)))?
                as u64;
            if let Some(expected) = commit.expected_version {
                if expected != actual {
                    return Err(StoreError::Conflict {
                        resource_id,
                        expected,
                        actual,
                    });
                }
            }

            let version = actual + 1;
            tx.execute(
                "UPDATE resources SET grants_version = ?2 WHERE resource_id = ?1",
                params![rid, version as i64],
            )?;

            for group_id in &commit.removals {
                tx.execute(
                    "DELETE FROM grants WHERE resource_id = ?1 AND group_id = ?2",
                    params![rid, group_id.as_bytes().as_slice()],
                )?;
            }
            for grant in &commit.upserts {
                tx.execute(
                    "INSERT INTO grants (resource_id, group_id, can_write, partial) VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(resource_id, group_id)
                     DO UPDATE SET can_write = excluded.can_write, partial = excluded.partial",
                    params![rid, grant.group_id.as_bytes().as_slice(), grant.can_write, grant.is_partial()],
                )?;
            }

            for group_id in &commit.keys_removed {
                tx.execute(
                    "DELETE FROM resource_keys WHERE resource_id = ?1 AND group_id = ?2",
                    params![rid, group_id.as_bytes().as_slice()],
                )?;
            }
            for key in &commit.keys_added {
                tx.execute(
                    "INSERT INTO resource_keys (resource_id, group_id, wrapped) VALUES (?1, ?2, ?3)
                     ON CONFLICT(resource_id, group_id) DO UPDATE SET wrapped = excluded.wrapped",
                    params![rid, key.group_id.as_bytes().as_slice(), to_cbor(&key.wrapped)?],
                )?;
            }

            let mut canceled = Vec::new();
            if let Some(process) = &commit.share_process {
                let now = now_millis();
                let older = query_processes(
                    &tx,
                    "SELECT record FROM share_processes
                     WHERE target_id = ?1 AND status IN ('pending', 'running')",
                    &process.target_id.as_bytes().as_slice(),
                )?;
                for mut older in older {
                    older
                        .cancel(now)
                        .map_err(|e| StoreError::InvalidData(e.to_string()))?;
                    write_process(&tx, &older)?;
                    canceled.push(older.id);
                }
                insert_process(&tx, process)?;
            }

            tx.commit()?;
            Ok(CommitResult { version, canceled })
        })
        .await
    }

    async fn list_resource_keys(&self, resource_id: &ResourceId) -> Result<Vec<ResourceKey>> {
        let resource_id = *resource_id;
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT group_id, wrapped FROM resource_keys WHERE resource_id = ?1 ORDER BY group_id",
            )?;
            let rows = stmt
                .query_map(params![resource_id.as_bytes().as_slice()], |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })?
                .collect::<rusqlite::Result<Vec<(Vec<u8>, Vec<u8>)>>>()?;
            rows.into_iter()
                .map(|row| decode_key(resource_id, row))
                .collect()
        })
        .await
    }

    async fn get_resource_key(
        &self,
        resource_id: &ResourceId,
        group_id: &GroupId,
    ) -> Result<Option<ResourceKey>> {
        let (resource_id, group_id) = (*resource_id, *group_id);
        self.run(move |conn| {
            let row: Option<(Vec<u8>, Vec<u8>)> = conn
                .query_row(
                    "SELECT group_id, wrapped FROM resource_keys WHERE resource_id = ?1 AND group_id = ?2",
                    params![resource_id.as_bytes().as_slice(), group_id.as_bytes().as_slice()],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            row.map(|row| decode_key(resource_id, row)).transpose()
        })
        .await
    }

    async fn get_share_process(&self, id: &ShareProcessId) -> Result<Option<ShareProcess>> {
        let id = *id;
        self.run(move |conn| {
            let mut found = query_processes(
                conn,
                "SELECT record FROM share_processes WHERE process_id = ?1",
                &id.as_bytes().as_slice(),
            )?;
            Ok(found.pop())
        })
        .await
    }

    async fn update_share_process(&self, process: &ShareProcess, expected: ShareStatus) -> Result<()> {
        let process = process.clone();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let stored: Option<String> = tx
                .query_row(
                    "SELECT status FROM share_processes WHERE process_id = ?1",
                    params![process.id.as_bytes().as_slice()],
                    |row| row.get(0),
                )
                .optional()?;
            let stored = stored
                .ok_or_else(|| StoreError::NotFound(format!("share process {}", process.id)))?;
            if ShareStatus::parse(&stored) != Some(expected) {
                return Err(StoreError::Superseded(process.id));
            }
            write_process(&tx, &process)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn list_share_processes(&self, status: ShareStatus) -> Result<Vec<ShareProcess>> {
        self.run(move |conn| {
            query_processes(
                conn,
                "SELECT record FROM share_processes WHERE status = ?1 ORDER BY created_at, rowid",
                &status.as_str(),
            )
        })
        .await
    }

    async fn list_share_processes_for_target(&self, target_id: &ResourceId) -> Result<Vec<ShareProcess>> {
        let target_id = *target_id;
        self.run(move |conn| {
            query_processes(
                conn,
                "SELECT record FROM share_processes WHERE target_id = ?1 ORDER BY created_at, rowid",
                &target_id.as_bytes().as_slice(),
            )
        })
        .await
    }
}
