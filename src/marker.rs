//! `TLSProtocolMarker`: turns one file's `DissectedRecord`s into a
//! `KeepRuleSet`, applying the content-type strategy table and the
//! `PreserveConfig` toggles. Runs after Deduplication and
//! Anonymization; if the dissector fails outright, the file gets an empty,
//! default-deny `KeepRuleSet` rather than aborting the run.

use std::path::Path;

use tracing::warn;

use crate::config::{ApplicationDataPreserve, PreserveConfig};
use crate::tls::{DissectedRecord, TLSDissector};
use crate::types::{KeepRule, KeepRuleMetadata, KeepRuleSet, KeepStrategy};

const CONTENT_TYPE_CHANGE_CIPHER_SPEC: u8 = 20;
const CONTENT_TYPE_ALERT: u8 = 21;
const CONTENT_TYPE_HANDSHAKE: u8 = 22;
const CONTENT_TYPE_APPLICATION_DATA: u8 = 23;
const CONTENT_TYPE_HEARTBEAT: u8 = 24;

pub struct TLSProtocolMarker<'a> {
    dissector: &'a dyn TLSDissector,
    preserve: PreserveConfig,
}

impl<'a> TLSProtocolMarker<'a> {
    pub fn new(dissector: &'a dyn TLSDissector, preserve: PreserveConfig) -> Self {
        Self { dissector, preserve }
    }

    /// Builds the `KeepRuleSet` for `path`. Never fails: a dissector error
    /// is logged and converted into the empty, default-deny set.
    pub fn build_rule_set(&self, path: &Path) -> KeepRuleSet {
        match self.dissector.analyse(path) {
            Ok(records) => {
                let rules = records
                    .into_iter()
                    .filter_map(|record| self.rule_for(&record))
                    .collect();
                KeepRuleSet::new(rules)
            }
            Err(e) => {
                warn!(error = %e, "TLS dissector unavailable, falling back to default-deny masking");
                KeepRuleSet::new(Vec::new())
            }
        }
    }

    /// Translates one dissected record into a `KeepRule`, or `None` if the
    /// content type's preservation toggle is off (fully dropped, not kept
    /// as an empty rule - it falls through to default-deny).
    fn rule_for(&self, record: &DissectedRecord) -> Option<KeepRule> {
        let strategy = match record.content_type {
            CONTENT_TYPE_CHANGE_CIPHER_SPEC if self.preserve.change_cipher_spec => KeepStrategy::FullPreserve,
            CONTENT_TYPE_ALERT if self.preserve.alert => KeepStrategy::FullPreserve,
            CONTENT_TYPE_HANDSHAKE if self.preserve.handshake => KeepStrategy::FullPreserve,
            CONTENT_TYPE_HEARTBEAT if self.preserve.heartbeat => KeepStrategy::FullPreserve,
            CONTENT_TYPE_APPLICATION_DATA => match self.preserve.application_data {
                ApplicationDataPreserve::Full => KeepStrategy::FullPreserve,
                ApplicationDataPreserve::HeaderOnly => KeepStrategy::HeaderOnly,
                ApplicationDataPreserve::None => return None,
            },
            _ => return None,
        };

        let range = record.byte_range();
        let seq_end = match strategy {
            KeepStrategy::HeaderOnly => range.start + 5,
            KeepStrategy::FullPreserve => range.end,
        };

        Some(KeepRule {
            stream_id: record.stream_id.clone(),
            direction: record.direction,
            seq_start: range.start,
            seq_end,
            strategy,
            metadata: KeepRuleMetadata {
                content_type: Some(record.content_type),
                approximate_extent: record.approximate_extent,
            },
        })
    }
}
