//! Matcher — proximity queries over the volunteer store
//!
//! Answers "who is available near this tree" for the dispatch engine and
//! "who is available at all" for the retry escalation path. Ordering
//! contract: if two volunteers are both eligible and one is strictly
//! closer, it precedes the other in the result. The radius boundary is
//! inclusive: a volunteer at exactly `radius_m` matches.

use crate::config::defaults::MATCH_RESULT_CAP;
use crate::error::EngineError;
use crate::geo::GeoPoint;
use crate::store::VolunteerStore;

/// A match result: volunteer id plus its distance from the query point.
#[derive(Debug, Clone, PartialEq)]
pub struct NearbyVolunteer {
    pub id: String,
    pub distance_m: f64,
}

/// Geospatial volunteer matcher.
#[derive(Clone)]
pub struct Matcher {
    volunteers: VolunteerStore,
    /// Result cap per query.
    cap: usize,
}

impl Matcher {
    pub fn new(volunteers: VolunteerStore) -> Self {
        Self {
            volunteers,
            cap: MATCH_RESULT_CAP,
        }
    }

    #[cfg(test)]
    fn with_cap(volunteers: VolunteerStore, cap: usize) -> Self {
        Self { volunteers, cap }
    }

    /// Active, available volunteers within `radius_m` of `point`,
    /// ordered by ascending great-circle distance, capped.
    ///
    /// A volunteer with a `preferred_radius_km` tighter than the query
    /// radius is only matched within their own cap.
    pub fn find_nearby_available(
        &self,
        point: GeoPoint,
        radius_m: f64,
    ) -> Result<Vec<NearbyVolunteer>, EngineError> {
        let mut matches: Vec<NearbyVolunteer> = Vec::new();
        for volunteer in self.volunteers.list_dispatchable()? {
            let effective_radius = match volunteer.preferred_radius_km {
                Some(preferred) => radius_m.min(preferred * 1_000.0),
                None => radius_m,
            };
            let distance = point.distance_m(&volunteer.location);
            if distance <= effective_radius {
                matches.push(NearbyVolunteer {
                    id: volunteer.id,
                    distance_m: distance,
                });
            }
        }
        matches.sort_by(|a, b| {
            a.distance_m
                .partial_cmp(&b.distance_m)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(self.cap);
        Ok(matches)
    }

    /// Every active, available volunteer id, unordered. Used by the
    /// retry sweep's radius-free escalation broadcast.
    pub fn find_all_available(&self) -> Result<Vec<String>, EngineError> {
        Ok(self
            .volunteers
            .list_dispatchable()?
            .into_iter()
            .map(|v| v.id)
            .collect())
    }
}
