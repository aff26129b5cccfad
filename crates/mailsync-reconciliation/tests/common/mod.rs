//! Shared test fixtures: in-memory collaborators with call counters and
//! failure injection.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use mailsync_connector::{
    async_trait, matches_name_pattern, Mailbox, MailboxFilter, MailboxInventory, OneOrMany,
    PermissionLookup, PermissionRecord, RecipientType, RemoteDirectory, RemoteError,
    RemoteResult, RemoteRuleObject, RuleId, RuleSpec, RuleUpdate,
};
use mailsync_core::{GranteeIdentity, MailboxRight, RightsClass, TenantId};
use mailsync_reconciliation::SyncConfig;

/// Install a test-writer subscriber once; `RUST_LOG` controls verbosity.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn tenant() -> TenantId {
    TenantId::parse("contoso.onmicrosoft.com").unwrap()
}

pub fn grantee() -> GranteeIdentity {
    GranteeIdentity::parse("helpdesk@contoso.com").unwrap()
}

/// `count` distinct display names that sort in generation order.
pub fn names(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("User {i:04}")).collect()
}

pub fn config() -> SyncConfig {
    SyncConfig::default()
}

// =============================================================================
// In-memory remote directory
// =============================================================================

pub struct InMemoryDirectory {
    objects: Mutex<BTreeMap<String, RemoteRuleObject>>,
    next_id: AtomicUsize,
    unique_names: bool,
    list_error: Mutex<Option<RemoteError>>,
    delete_error: Mutex<Option<RemoteError>>,
    transient_create_failures: Mutex<HashMap<String, usize>>,
    create_errors: Mutex<HashMap<String, RemoteError>>,
    vanish_on_update: Mutex<HashSet<String>>,
    list_calls: AtomicUsize,
    create_calls: AtomicUsize,
    update_calls: AtomicUsize,
    delete_calls: AtomicUsize,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            next_id: AtomicUsize::new(1),
            unique_names: false,
            list_error: Mutex::new(None),
            delete_error: Mutex::new(None),
            transient_create_failures: Mutex::new(HashMap::new()),
            create_errors: Mutex::new(HashMap::new()),
            vanish_on_update: Mutex::new(HashSet::new()),
            list_calls: AtomicUsize::new(0),
            create_calls: AtomicUsize::new(0),
            update_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
        }
    }

    /// Reject creates and renames that would duplicate a name, like the
    /// real directory does.
    pub fn with_unique_names(mut self) -> Self {
        self.unique_names = true;
        self
    }

    pub fn with_list_error(self, error: RemoteError) -> Self {
        *self.list_error.lock().unwrap() = Some(error);
        self
    }

    /// Refuse every delete.
    pub fn with_delete_error(self, error: RemoteError) -> Self {
        *self.delete_error.lock().unwrap() = Some(error);
        self
    }

    /// Fail creating `name` transiently `times` times, then succeed.
    pub fn with_transient_create_failures(self, name: &str, times: usize) -> Self {
        self.transient_create_failures
            .lock()
            .unwrap()
            .insert(name.to_lowercase(), times);
        self
    }

    /// Always fail creating `name`.
    pub fn with_create_error(self, name: &str, error: RemoteError) -> Self {
        self.create_errors
            .lock()
            .unwrap()
            .insert(name.to_lowercase(), error);
        self
    }

    /// Delete `id` behind the engine's back when it is next updated.
    pub fn vanish_on_update(&self, id: &RuleId) {
        self.vanish_on_update
            .lock()
            .unwrap()
            .insert(id.as_str().to_string());
    }

    /// Insert an object as if someone else had created it.
    pub fn seed(&self, object: RemoteRuleObject) {
        self.objects
            .lock()
            .unwrap()
            .insert(object.id.as_str().to_string(), object);
    }

    /// Toggle the enabled flag as an administrator would.
    pub fn set_enabled(&self, id: &RuleId, enabled: bool) {
        if let Some(object) = self.objects.lock().unwrap().get_mut(id.as_str()) {
            object.enabled = enabled;
        }
    }

    pub fn objects(&self) -> Vec<RemoteRuleObject> {
        self.objects.lock().unwrap().values().cloned().collect()
    }

    /// Shard objects ordered by name length then name, so "Shard 10"
    /// follows "Shard 9".
    pub fn shards(&self, prefix: &str) -> Vec<RemoteRuleObject> {
        let mut shards: Vec<RemoteRuleObject> = self
            .objects()
            .into_iter()
            .filter(|o| o.name.starts_with(prefix))
            .collect();
        shards.sort_by(|a, b| a.name.len().cmp(&b.name.len()).then(a.name.cmp(&b.name)));
        shards
    }

    pub fn named(&self, name: &str) -> Vec<RemoteRuleObject> {
        self.objects()
            .into_iter()
            .filter(|o| o.name == name)
            .collect()
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    pub fn mutation_calls(&self) -> usize {
        self.create_calls() + self.update_calls() + self.delete_calls()
    }

    fn check_unique(
        &self,
        objects: &BTreeMap<String, RemoteRuleObject>,
        name: &str,
        except: Option<&str>,
    ) -> RemoteResult<()> {
        if !self.unique_names {
            return Ok(());
        }
        let taken = objects
            .values()
            .any(|o| o.name.eq_ignore_ascii_case(name) && Some(o.id.as_str()) != except);
        if taken {
            return Err(RemoteError::validation(format!(
                "a rule named '{name}' already exists"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteDirectory for InMemoryDirectory {
    async fn list_rules(&self, name_pattern: &str) -> RemoteResult<Vec<RemoteRuleObject>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.list_error.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(self
            .objects()
            .into_iter()
            .filter(|o| matches_name_pattern(name_pattern, &o.name))
            .collect())
    }

    async fn create_rule(&self, spec: &RuleSpec) -> RemoteResult<RuleId> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let key = spec.name.to_lowercase();

        if let Some(error) = self.create_errors.lock().unwrap().get(&key) {
            return Err(error.clone());
        }
        if let Some(remaining) = self.transient_create_failures.lock().unwrap().get_mut(&key) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(RemoteError::unavailable("directory busy"));
            }
        }

        let mut objects = self.objects.lock().unwrap();
        self.check_unique(&objects, &spec.name, None)?;
        let id = RuleId::new(format!(
            "rule-{}",
            self.next_id.fetch_add(1, Ordering::SeqCst)
        ));
        objects.insert(
            id.as_str().to_string(),
            RemoteRuleObject {
                id: id.clone(),
                name: spec.name.clone(),
                priority: spec.priority,
                enabled: spec.enabled,
                condition: spec.condition.clone(),
                action: spec.action.clone(),
            },
        );
        Ok(id)
    }

    async fn update_rule(&self, id: &RuleId, update: &RuleUpdate) -> RemoteResult<()> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        let mut objects = self.objects.lock().unwrap();

        if self.vanish_on_update.lock().unwrap().remove(id.as_str()) {
            objects.remove(id.as_str());
        }
        if !objects.contains_key(id.as_str()) {
            return Err(RemoteError::not_found(id.as_str()));
        }
        let renaming = objects
            .get(id.as_str())
            .is_some_and(|o| !o.name.eq_ignore_ascii_case(&update.name));
        if renaming {
            self.check_unique(&objects, &update.name, Some(id.as_str()))?;
        }

        let object = objects
            .get_mut(id.as_str())
            .ok_or_else(|| RemoteError::not_found(id.as_str()))?;
        object.name = update.name.clone();
        object.priority = update.priority;
        object.condition = update.condition.clone();
        object.action = update.action.clone();
        Ok(())
    }

    async fn delete_rule(&self, id: &RuleId) -> RemoteResult<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.delete_error.lock().unwrap().clone() {
            return Err(error);
        }
        match self.objects.lock().unwrap().remove(id.as_str()) {
            Some(_) => Ok(()),
            None => Err(RemoteError::not_found(id.as_str())),
        }
    }
}

// =============================================================================
// In-memory mailbox inventory
// =============================================================================

pub fn mailbox(alias: &str, recipient_type: RecipientType) -> Mailbox {
    Mailbox {
        identity: alias.to_string(),
        alias: alias.to_string(),
        primary_smtp_address: format!("{alias}@contoso.com"),
        recipient_type,
    }
}

/// `count` user mailboxes named `user000`, `user001`, ...
pub fn user_mailboxes(count: usize) -> Vec<Mailbox> {
    (0..count)
        .map(|i| mailbox(&format!("user{i:03}"), RecipientType::UserMailbox))
        .collect()
}

pub struct InMemoryInventory {
    mailboxes: Vec<Mailbox>,
    grants: Mutex<HashMap<String, BTreeSet<MailboxRight>>>,
    list_error: Option<RemoteError>,
    transient_read_failures: Mutex<HashMap<String, usize>>,
    grant_errors: HashMap<String, RemoteError>,
    send_as_errors: HashMap<String, RemoteError>,
    latency: Duration,
    list_grants_calls: AtomicUsize,
    grant_calls: AtomicUsize,
    send_as_calls: AtomicUsize,
}

impl InMemoryInventory {
    pub fn new(mailboxes: Vec<Mailbox>) -> Self {
        Self {
            mailboxes,
            grants: Mutex::new(HashMap::new()),
            list_error: None,
            transient_read_failures: Mutex::new(HashMap::new()),
            grant_errors: HashMap::new(),
            send_as_errors: HashMap::new(),
            latency: Duration::ZERO,
            list_grants_calls: AtomicUsize::new(0),
            grant_calls: AtomicUsize::new(0),
            send_as_calls: AtomicUsize::new(0),
        }
    }

    /// Pre-existing rights for the grantee on `identity`.
    pub fn with_existing(self, identity: &str, rights: &[MailboxRight]) -> Self {
        self.grants
            .lock()
            .unwrap()
            .entry(identity.to_string())
            .or_default()
            .extend(rights.iter().copied());
        self
    }

    pub fn with_list_error(mut self, error: RemoteError) -> Self {
        self.list_error = Some(error);
        self
    }

    /// Fail reading grants on `identity` transiently `times` times.
    pub fn with_transient_read_failures(self, identity: &str, times: usize) -> Self {
        self.transient_read_failures
            .lock()
            .unwrap()
            .insert(identity.to_string(), times);
        self
    }

    pub fn with_grant_error(mut self, identity: &str, error: RemoteError) -> Self {
        self.grant_errors.insert(identity.to_string(), error);
        self
    }

    pub fn with_send_as_error(mut self, identity: &str, error: RemoteError) -> Self {
        self.send_as_errors.insert(identity.to_string(), error);
        self
    }

    /// Every grant read and write takes this long.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn rights_on(&self, identity: &str) -> BTreeSet<MailboxRight> {
        self.grants
            .lock()
            .unwrap()
            .get(identity)
            .cloned()
            .unwrap_or_default()
    }

    pub fn list_grants_calls(&self) -> usize {
        self.list_grants_calls.load(Ordering::SeqCst)
    }

    pub fn grant_calls(&self) -> usize {
        self.grant_calls.load(Ordering::SeqCst)
    }

    pub fn send_as_calls(&self) -> usize {
        self.send_as_calls.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl MailboxInventory for InMemoryInventory {
    async fn list_mailboxes(&self, _filter: &MailboxFilter) -> RemoteResult<Vec<Mailbox>> {
        if let Some(error) = &self.list_error {
            return Err(error.clone());
        }
        // Server-side filtering is optional; return everything.
        Ok(self.mailboxes.clone())
    }

    /// Mailbox-permission rights come back as one record, send-as as a
    /// second one, so the lookup is empty, a bare record or a list depending
    /// on what is held.
    async fn list_grants(
        &self,
        mailbox: &Mailbox,
        grantee: &GranteeIdentity,
    ) -> RemoteResult<PermissionLookup> {
        self.list_grants_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;

        if let Some(remaining) = self
            .transient_read_failures
            .lock()
            .unwrap()
            .get_mut(&mailbox.identity)
        {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(RemoteError::unavailable("inventory throttled"));
            }
        }

        let held = self.rights_on(&mailbox.identity);
        let (send_as, mailbox_rights): (Vec<MailboxRight>, Vec<MailboxRight>) = held
            .into_iter()
            .partition(|r| r.class() == RightsClass::SendAs);

        let mut records = Vec::new();
        if !mailbox_rights.is_empty() {
            records.push(PermissionRecord::allow(
                grantee.as_str().to_uppercase(),
                mailbox_rights,
            ));
        }
        if !send_as.is_empty() {
            records.push(PermissionRecord::allow(grantee.as_str(), send_as));
        }

        Ok(match records.len() {
            0 => OneOrMany::Empty,
            1 => OneOrMany::One(records.remove(0)),
            _ => OneOrMany::Many(records),
        })
    }

    async fn grant(
        &self,
        mailbox: &Mailbox,
        _grantee: &GranteeIdentity,
        rights: &BTreeSet<MailboxRight>,
        _automap: bool,
    ) -> RemoteResult<()> {
        self.grant_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if let Some(error) = self.grant_errors.get(&mailbox.identity) {
            return Err(error.clone());
        }
        self.grants
            .lock()
            .unwrap()
            .entry(mailbox.identity.clone())
            .or_default()
            .extend(rights.iter().copied());
        Ok(())
    }

    async fn grant_send_as(
        &self,
        mailbox: &Mailbox,
        _grantee: &GranteeIdentity,
    ) -> RemoteResult<()> {
        self.send_as_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if let Some(error) = self.send_as_errors.get(&mailbox.identity) {
            return Err(error.clone());
        }
        self.grants
            .lock()
            .unwrap()
            .entry(mailbox.identity.clone())
            .or_default()
            .insert(MailboxRight::SendAs);
        Ok(())
    }
}
