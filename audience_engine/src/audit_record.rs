// Change audit trail for audience administration.
//
// Every mutation made through the manager appends one record:
// 1. Monotonic sequence number
// 2. Audience identity (id + name at the time of the change)
// 3. What changed
// 4. SHA-256 digest of the resulting rule list
// 5. Provenance hash chained to the previous record, for tamper detection
//
// The trail is bounded; the oldest records fall off first.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::audience_metadata::AudienceId;
use crate::rule_grammar::RuleComponent;

/// Sequence number for audit records
pub type SequenceNumber = u64;

/// Kind of change recorded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Updated,
    RulesAdded { count: usize },
    RulesCleared { unlocked: bool },
    Deleted,
    CompileRequested { full: bool },
}

impl ChangeKind {
    pub fn summary(&self) -> String {
        match self {
            ChangeKind::Created => "CREATED".to_string(),
            ChangeKind::Updated => "UPDATED".to_string(),
            ChangeKind::RulesAdded { count } => format!("RULES_ADDED: {}", count),
            ChangeKind::RulesCleared { unlocked } => format!("RULES_CLEARED (unlocked={})", unlocked),
            ChangeKind::Deleted => "DELETED".to_string(),
            ChangeKind::CompileRequested { full } => format!("COMPILE (full={})", full),
        }
    }
}

/// One audited change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub seq: SequenceNumber,
    pub audience_id: AudienceId,
    pub audience_name: String,
    pub change: ChangeKind,
    /// Hex SHA-256 of the rule list after the change
    pub rules_digest: String,
    pub recorded_at: DateTime<Utc>,
    /// Hex SHA-256 over this record's fields and the previous hash
    pub provenance_hash: String,
}

impl AuditRecord {
    /// Recomputes the provenance hash against `previous_hash`.
    pub fn verify(&self, previous_hash: &str) -> bool {
        self.provenance_hash
            == compute_provenance_hash(
                self.seq,
                &self.audience_id,
                &self.audience_name,
                &self.change,
                &self.rules_digest,
                previous_hash,
            )
    }

    pub fn summary(&self) -> String {
        format!(
            "#{} {} '{}' {}",
            self.seq,
            self.change.summary(),
            self.audience_name,
            self.audience_id
        )
    }
}

/// Digest of a rule list in its flat wire order.
pub fn rules_digest(rules: &[RuleComponent]) -> String {
    let mut hasher = Sha256::new();
    for rule in rules {
        let (op, field, value) = rule.triple();
        hasher.update(op.as_bytes());
        hasher.update([0x1fu8]);
        hasher.update(field.unwrap_or_default().as_bytes());
        hasher.update([0x1fu8]);
        hasher.update(value.unwrap_or_default().as_bytes());
        hasher.update([0x1eu8]);
    }
    hex(&hasher.finalize())
}

fn compute_provenance_hash(
    seq: SequenceNumber,
    audience_id: &AudienceId,
    audience_name: &str,
    change: &ChangeKind,
    rules_digest: &str,
    previous_hash: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(seq.to_le_bytes());
    hasher.update(audience_id.as_uuid().as_bytes());
    hasher.update(audience_name.as_bytes());
    hasher.update(change.summary().as_bytes());
    hasher.update(rules_digest.as_bytes());
    hasher.update(previous_hash.as_bytes());
    hex(&hasher.finalize())
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Bounded, hash-chained list of changes
#[derive(Debug, Clone)]
pub struct AuditTrail {
    records: VecDeque<AuditRecord>,
    max_in_memory: usize,
    next_seq: SequenceNumber,
    last_hash: String,
    /// Hash preceding the oldest retained record
    anchor_hash: String,
}

impl AuditTrail {
    pub fn new(max_in_memory: usize) -> Self {
        Self {
            records: VecDeque::new(),
            max_in_memory: max_in_memory.max(1),
            next_seq: 1,
            last_hash: String::new(),
            anchor_hash: String::new(),
        }
    }

    /// Appends a change and returns the stored record.
    pub fn record(
        &mut self,
        audience_id: AudienceId,
        audience_name: &str,
        change: ChangeKind,
        rules: &[RuleComponent],
    ) -> &AuditRecord {
        let seq = self.next_seq;
        self.next_seq += 1;

        let digest = rules_digest(rules);
        let provenance_hash =
            compute_provenance_hash(seq, &audience_id, audience_name, &change, &digest, &self.last_hash);

        let record = AuditRecord {
            seq,
            audience_id,
            audience_name: audience_name.to_string(),
            change,
            rules_digest: digest,
            recorded_at: Utc::now(),
            provenance_hash: provenance_hash.clone(),
        };
        self.last_hash = provenance_hash;

        if self.records.len() == self.max_in_memory {
            if let Some(dropped) = self.records.pop_front() {
                self.anchor_hash = dropped.provenance_hash;
            }
        }
        self.records.push_back(record);
        &self.records[self.records.len() - 1]
    }

    pub fn records(&self) -> impl Iterator<Item = &AuditRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records_for(&self, audience_id: AudienceId) -> Vec<&AuditRecord> {
        self.records
            .iter()
            .filter(|r| r.audience_id == audience_id)
            .collect()
    }

    /// Checks every retained record against its predecessor.
    pub fn verify_chain(&self) -> bool {
        let mut previous = self.anchor_hash.as_str();
        for record in &self.records {
            if !record.verify(previous) {
                return false;
            }
            previous = &record.provenance_hash;
        }
        true
    }
}

impl Default for AuditTrail {
    fn default() -> Self {
        Self::new(1000)
    }
}
