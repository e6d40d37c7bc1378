//! Visitor login records.
//!
//! A visitor must log in over HTTP before its socket is accepted; the login
//! produces the [`VisitorProfile`] (name, avatar, assigned agent) that the
//! handshake gate binds to the socket.
//!
//! # Data Flow
//! ```text
//! POST /visitor_login → login.rs (defaults, extra decoding) → VisitorDirectory
//! GET  /ws_visitor    → HandshakeGate::check_visitor → VisitorDirectory::get
//! ```

pub mod login;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

use crate::hub::session::VisitorProfile;

/// A stored login record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VisitorRecord {
    #[serde(flatten)]
    pub profile: VisitorProfile,
    /// Raw `extra` form value from the most recent login.
    pub extra: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// In-process directory of visitors that have logged in.
#[derive(Debug, Clone, Default)]
pub struct VisitorDirectory {
    records: Arc<DashMap<String, VisitorRecord>>,
}

impl VisitorDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh a visitor's profile, keeping its creation time.
    pub fn upsert(&self, profile: VisitorProfile) -> VisitorRecord {
        self.upsert_with_extra(profile, String::new())
    }

    pub fn upsert_with_extra(&self, profile: VisitorProfile, extra: String) -> VisitorRecord {
        let now = Utc::now();
        let mut entry = self
            .records
            .entry(profile.visitor_id.clone())
            .or_insert_with(|| VisitorRecord {
                profile: profile.clone(),
                extra: String::new(),
                created_at: now,
                updated_at: now,
            });
        entry.profile = profile;
        entry.extra = extra;
        entry.updated_at = now;
        entry.clone()
    }

    pub fn get(&self, visitor_id: &str) -> Option<VisitorProfile> {
        self.records.get(visitor_id).map(|r| r.profile.clone())
    }

    pub fn record(&self, visitor_id: &str) -> Option<VisitorRecord> {
        self.records.get(visitor_id).map(|r| r.clone())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
