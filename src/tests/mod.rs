//! Cross-module scenarios exercising the database end to end: sampling
//! statistics, subnet diversity, profile re-weighting, scan gating,
//! reconciliation, and persistence round trips.

mod persistence;
mod reconciliation;
mod util;
