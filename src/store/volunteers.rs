//! Volunteer persistence
//!
//! Records are created by the platform's registration surface; the engine
//! flips `availability` through conditional updates so an accept race
//! can never leave a volunteer double-booked.

use std::collections::BTreeMap;

use chrono::Utc;
use tracing::warn;

use crate::error::EngineError;
use crate::types::{Availability, Volunteer};

/// Result of a conditional availability flip.
#[derive(Debug)]
pub enum AvailabilityOutcome {
    Applied(Volunteer),
    /// The record was not in the expected availability state.
    Rejected(Volunteer),
    Missing,
}

/// Sled-backed volunteer collection with a unique email index.
#[derive(Clone)]
pub struct VolunteerStore {
    volunteers: sled::Tree,
    email_idx: sled::Tree,
}

impl VolunteerStore {
    pub fn open(db: &sled::Db) -> Result<Self, EngineError> {
        Ok(Self {
            volunteers: db.open_tree("volunteers")?,
            email_idx: db.open_tree("volunteers_email_idx")?,
        })
    }

    /// Register a volunteer record. Fails on a duplicate email.
    pub fn insert(&self, volunteer: &Volunteer) -> Result<(), EngineError> {
        let email_key = volunteer.email.to_lowercase();
        let claim = self.email_idx.compare_and_swap(
            email_key.as_bytes(),
            None::<&[u8]>,
            Some(volunteer.id.as_bytes()),
        )?;
        if let Err(existing) = claim {
            let holder = existing
                .current
                .map(|v| String::from_utf8_lossy(&v).to_string());
            if holder.as_deref() != Some(volunteer.id.as_str()) {
                return Err(EngineError::DuplicateEmail(volunteer.email.clone()));
            }
        }
        let value = serde_json::to_vec(volunteer)?;
        self.volunteers.insert(volunteer.id.as_bytes(), value)?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<Volunteer>, EngineError> {
        match self.volunteers.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Every active, available volunteer.
    pub fn list_dispatchable(&self) -> Result<Vec<Volunteer>, EngineError> {
        let mut rows = Vec::new();
        for item in self.volunteers.iter() {
            let (_, value) = item?;
            match serde_json::from_slice::<Volunteer>(&value) {
                Ok(v) if v.is_dispatchable() => rows.push(v),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "skipping undecodable volunteer row"),
            }
        }
        Ok(rows)
    }

    /// Conditionally flip availability.
    ///
    /// `expect = Some(state)` makes the flip a compare-and-set (used by
    /// accept: available → busy, losing a concurrent double-accept);
    /// `expect = None` applies unconditionally (release on resolve/cancel).
    pub fn set_availability(
        &self,
        id: &str,
        expect: Option<Availability>,
        to: Availability,
    ) -> Result<AvailabilityOutcome, EngineError> {
        let mut outcome = AvailabilityOutcome::Missing;
        let mut decode_failure: Option<String> = None;

        self.volunteers
            .update_and_fetch(id.as_bytes(), |old| match old {
                None => {
                    outcome = AvailabilityOutcome::Missing;
                    None
                }
                Some(bytes) => match serde_json::from_slice::<Volunteer>(bytes) {
                    Ok(mut volunteer) => {
                        let admissible =
                            expect.is_none() || expect == Some(volunteer.availability);
                        if admissible {
                            volunteer.availability = to;
                            volunteer.updated_at = Utc::now();
                            match serde_json::to_vec(&volunteer) {
                                Ok(buf) => {
                                    outcome = AvailabilityOutcome::Applied(volunteer);
                                    Some(buf)
                                }
                                Err(e) => {
                                    decode_failure = Some(e.to_string());
                                    Some(bytes.to_vec())
                                }
                            }
                        } else {
                            outcome = AvailabilityOutcome::Rejected(volunteer);
                            Some(bytes.to_vec())
                        }
                    }
                    Err(e) => {
                        decode_failure = Some(e.to_string());
                        Some(bytes.to_vec())
                    }
                },
            })?;

        if let Some(msg) = decode_failure {
            return Err(EngineError::Storage(format!("volunteer row {id}: {msg}")));
        }
        Ok(outcome)
    }

    /// Volunteer counts keyed by availability, for the admin aggregate.
    pub fn counts_by_availability(&self) -> Result<BTreeMap<String, u64>, EngineError> {
        let mut counts = BTreeMap::new();
        for item in self.volunteers.iter() {
            let (_, value) = item?;
            if let Ok(v) = serde_json::from_slice::<Volunteer>(&value) {
                if !v.active {
                    continue;
                }
                *counts.entry(v.availability.to_string()).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }
}
