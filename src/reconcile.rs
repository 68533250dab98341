//! Diff the PDFs discovered this run against the destination folder's contents.
//!
//! Identity is the file name alone. Every discovered PDF is uploaded again on every run;
//! nothing compares content or modification times.

use std::collections::{BTreeMap, BTreeSet};

use crate::contract::{PdfReference, RemoteItem};

/// Mutations required to make the remote folder mirror the discovered set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Every discovered PDF.
    pub to_upload: BTreeSet<PdfReference>,
    /// Remote items whose name was not discovered this run.
    pub to_delete: BTreeSet<RemoteItem>,
    /// Remote items that share a name with a discovered PDF, keyed by that name.
    /// They are replaced once the fresh upload for the name succeeds.
    pub superseded: BTreeMap<String, BTreeSet<RemoteItem>>,
}

impl Reconciliation {
    /// Discovery came back empty while the folder still has content: applying this plan
    /// deletes everything.
    pub fn is_full_wipe(&self) -> bool {
        self.to_upload.is_empty() && !self.to_delete.is_empty()
    }
}

/// Pure: the same inputs always produce the same plan.
pub fn reconcile<'a, D, R>(discovered: D, remote: R) -> Reconciliation
where
    D: IntoIterator<Item = &'a PdfReference>,
    R: IntoIterator<Item = &'a RemoteItem>,
{
    let to_upload: BTreeSet<PdfReference> = discovered.into_iter().cloned().collect();
    let names: BTreeSet<&str> = to_upload.iter().map(|p| p.file_name.as_str()).collect();

    let mut to_delete = BTreeSet::new();
    let mut superseded: BTreeMap<String, BTreeSet<RemoteItem>> = BTreeMap::new();
    for item in remote {
        if names.contains(item.name.as_str()) {
            superseded
                .entry(item.name.clone())
                .or_default()
                .insert(item.clone());
        } else {
            to_delete.insert(item.clone());
        }
    }

    Reconciliation {
        to_upload,
        to_delete,
        superseded,
    }
}
