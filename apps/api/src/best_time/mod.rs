//! Best contact hour inference.
//!
//! The estimator itself is pure (`estimator`); this module feeds it from the
//! stored contacts of a page. A contact's own histogram is its persisted top
//! hours; neighbors are the other contacts of the page anchored at their
//! stored best hour (or their own histogram's mode when none is stored).

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::contact::{Confidence, Contact, HourCount};
use crate::store::ContactStore;

mod estimator;
pub mod handlers;
mod histogram;

pub use estimator::{estimate_best_time, BestTime, EstimatorParams, Neighbor};
pub use histogram::{local_hour, HourHistogram, VolumeTiers};

#[derive(Debug, Serialize)]
pub struct ContactBestTime {
    pub contact_id: Uuid,
    #[serde(flatten)]
    pub estimate: BestTime,
    pub stored_hour: Option<u8>,
    pub stored_confidence: Confidence,
    pub top_hours: Vec<HourCount>,
}

#[derive(Debug, Serialize)]
pub struct PageBestTimeOverview {
    pub page_id: Uuid,
    pub contacts: usize,
    pub best_hour: Option<u8>,
    pub histogram: Vec<HourCount>,
    pub by_confidence: BTreeMap<Confidence, usize>,
}

#[derive(Debug, Serialize)]
pub struct RecomputeSummary {
    pub page_id: Uuid,
    pub updated: usize,
    pub by_confidence: BTreeMap<Confidence, usize>,
}

fn own_histogram(contact: &Contact) -> HourHistogram {
    HourHistogram::from_counts(&contact.top_hours)
}

fn page_histogram(contacts: &[Contact]) -> HourHistogram {
    let mut page = HourHistogram::new();
    for contact in contacts {
        page.merge(&own_histogram(contact));
    }
    page
}

fn neighbors_of(contact_id: Uuid, contacts: &[Contact]) -> Vec<Neighbor> {
    contacts
        .iter()
        .filter(|c| c.id != contact_id)
        .filter_map(|c| {
            let histogram = own_histogram(c);
            let anchor_hour = c.best_contact_hour.or_else(|| histogram.mode())?;
            Some(Neighbor {
                anchor_hour,
                histogram,
            })
        })
        .collect()
}

fn estimate_for(
    contact: &Contact,
    contacts: &[Contact],
    page: &HourHistogram,
    params: &EstimatorParams,
) -> BestTime {
    let own = own_histogram(contact);
    // top_hours is truncated; the stored count covers every interaction
    let interactions = match contact.interaction_count {
        0 => own.total(),
        n => n,
    };
    estimate_best_time(
        &own,
        interactions,
        &neighbors_of(contact.id, contacts),
        page,
        params,
    )
}

fn empty_distribution() -> BTreeMap<Confidence, usize> {
    Confidence::ALL.iter().map(|c| (*c, 0)).collect()
}

/// Read-only estimate for one contact.
pub async fn contact_best_time(
    contacts: &dyn ContactStore,
    page_id: Uuid,
    contact_id: Uuid,
    params: &EstimatorParams,
) -> Result<ContactBestTime, AppError> {
    let contact = contacts
        .get_contact(page_id, contact_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Contact {contact_id} not found")))?;

    let all = contacts.contacts_for_page(page_id).await?;
    let page = page_histogram(&all);
    let estimate = estimate_for(&contact, &all, &page, params);

    Ok(ContactBestTime {
        contact_id,
        estimate,
        stored_hour: contact.best_contact_hour,
        stored_confidence: contact.best_contact_confidence,
        top_hours: contact.top_hours,
    })
}

/// Page-wide histogram and the distribution of stored confidences.
pub async fn page_overview(
    contacts: &dyn ContactStore,
    page_id: Uuid,
) -> Result<PageBestTimeOverview, AppError> {
    let all = contacts.contacts_for_page(page_id).await?;
    let page = page_histogram(&all);

    let mut by_confidence = empty_distribution();
    for contact in &all {
        *by_confidence
            .entry(contact.best_contact_confidence)
            .or_default() += 1;
    }

    Ok(PageBestTimeOverview {
        page_id,
        contacts: all.len(),
        best_hour: page.mode(),
        histogram: page
            .iter()
            .filter(|(_, count)| *count > 0)
            .map(|(hour, count)| HourCount { hour, count })
            .collect(),
        by_confidence,
    })
}

/// Re-estimates every contact of the page and persists the result.
///
/// All estimates are computed from one snapshot before anything is written, so
/// the outcome does not depend on the order contacts are visited in.
pub async fn recompute_page(
    contacts: &dyn ContactStore,
    page_id: Uuid,
    params: &EstimatorParams,
) -> Result<RecomputeSummary, AppError> {
    let all = contacts.contacts_for_page(page_id).await?;
    let page = page_histogram(&all);

    let estimates: Vec<(Uuid, BestTime)> = all
        .iter()
        .map(|c| (c.id, estimate_for(c, &all, &page, params)))
        .collect();

    let mut by_confidence = empty_distribution();
    for (contact_id, estimate) in &estimates {
        contacts
            .save_best_time(*contact_id, estimate.hour, estimate.confidence)
            .await?;
        *by_confidence.entry(estimate.confidence).or_default() += 1;
    }

    info!(
        page_id = %page_id,
        updated = estimates.len(),
        "Best contact hours recomputed"
    );

    Ok(RecomputeSummary {
        page_id,
        updated: estimates.len(),
        by_confidence,
    })
}
