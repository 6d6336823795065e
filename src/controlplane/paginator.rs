//! List Paginator
//!
//! Offset-token pages over every disk on every backend instance. The set is
//! recomputed on each call in enumeration order; no cursor state is kept.

use crate::controlplane::context::RequestContext;
use crate::controlplane::csi::{ListVolumesEntry, ListVolumesResponse, Volume};
use crate::domain::disk::FirstClassDisk;
use crate::domain::ports::{BackendInstance, ConnectionManagerRef};
use crate::error::{Error, Result};
use futures::future::join_all;
use tracing::{error, info, warn};

/// A disk together with the instance it lives on
#[derive(Debug, Clone)]
pub struct LocatedDisk {
    pub vc_server: String,
    pub datacenter: String,
    pub disk: FirstClassDisk,
}

impl LocatedDisk {
    pub fn to_volume(&self) -> Result<Volume> {
        Volume::from_disk(&self.disk, &self.vc_server, &self.datacenter)
    }
}

/// Inclusive page bounds over a set of `total` items
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageBounds {
    pub start: usize,
    pub stop: usize,
    pub total: usize,
}

impl PageBounds {
    /// `stop` is `total` unless a page limit smaller than `total` applies
    pub fn compute(start: usize, max_entries: usize, total: usize) -> Result<Self> {
        if start > total {
            let msg = format!(
                "Invalid start token {}. Greater than total items {}.",
                start, total
            );
            error!("{}", msg);
            return Err(Error::Internal(msg));
        }

        let mut stop = total;
        if max_entries != 0 && stop > max_entries {
            stop = start + max_entries - 1;
        }

        Ok(Self { start, stop, total })
    }

    pub fn range(&self) -> std::ops::Range<usize> {
        if self.stop >= self.total {
            self.start..self.total
        } else {
            self.start..self.stop + 1
        }
    }

    pub fn next_token(&self) -> Option<String> {
        (self.stop < self.total).then(|| (self.stop + 1).to_string())
    }
}

/// Parse a starting token into an offset
pub fn parse_starting_token(token: &str) -> Result<usize> {
    if token.is_empty() {
        return Ok(0);
    }
    token.parse::<usize>().map_err(|e| {
        let msg = format!("Invalid starting token {}. Err: {}", token, e);
        error!("{}", msg);
        Error::InvalidArgument(msg)
    })
}

pub struct ListPaginator {
    connections: ConnectionManagerRef,
}

impl ListPaginator {
    pub fn new(connections: ConnectionManagerRef) -> Self {
        Self { connections }
    }

    /// Every disk across all instances; failing instances are skipped
    pub async fn all_disks(&self, ctx: &RequestContext) -> Result<Vec<LocatedDisk>> {
        let instances = ctx
            .run("ListBackendInstances", self.connections.backend_instances())
            .await?
            .map_err(|e| {
                let msg = format!("listing backend instances failed: {}", e);
                error!("{}", msg);
                Error::Internal(msg)
            })?;

        let listings = ctx
            .run(
                "ListFirstClassDisks",
                join_all(instances.iter().map(|i| i.datacenter.list_disks())),
            )
            .await?;

        let mut disks = Vec::new();
        for (instance, listing) in instances.iter().zip(listings) {
            match listing {
                Ok(found) => disks.extend(found.into_iter().map(|disk| locate(instance, disk))),
                Err(e) => warn!(
                    "Skipping {}/{} in volume listing: {}",
                    instance.vc_server,
                    instance.datacenter_name(),
                    e
                ),
            }
        }
        Ok(disks)
    }

    pub async fn page(
        &self,
        ctx: &RequestContext,
        starting_token: &str,
        max_entries: i32,
    ) -> Result<ListVolumesResponse> {
        let max_entries = usize::try_from(max_entries).map_err(|_| {
            let msg = format!("Invalid max entries {}. Must not be negative.", max_entries);
            error!("{}", msg);
            Error::InvalidArgument(msg)
        })?;
        let start = parse_starting_token(starting_token)?;

        let disks = self.all_disks(ctx).await?;
        let bounds = PageBounds::compute(start, max_entries, disks.len())?;

        info!(
            "Start: {}, End: {}, Total: {}",
            bounds.start, bounds.stop, bounds.total
        );

        let entries = disks[bounds.range()]
            .iter()
            .map(|d| d.to_volume().map(|volume| ListVolumesEntry { volume }))
            .collect::<Result<Vec<_>>>()?;

        let next_token = bounds.next_token().unwrap_or_default();
        if !next_token.is_empty() {
            info!("Next token is {}", next_token);
        }

        Ok(ListVolumesResponse {
            entries,
            next_token,
        })
    }
}

fn locate(instance: &BackendInstance, disk: FirstClassDisk) -> LocatedDisk {
    LocatedDisk {
        vc_server: instance.vc_server.clone(),
        datacenter: instance.datacenter_name().to_string(),
        disk,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::controlplane::backends::simulator::{Operation, SimulatedConnectionManager};
    use crate::domain::disk::{DiskBacking, DiskParent, ATTRIBUTE_DATACENTER, ATTRIBUTE_VCENTER};
    use crate::error::{Code, DriverError};
    use std::sync::Arc;

    fn inventory(disks_per_dc: &[(&str, usize)]) -> Arc<SimulatedConnectionManager> {
        let config = Config::from_yaml(
            r#"
virtualCenters:
  vc1:
    datacenters:
      - name: dc-a
        datastores: [ds-1]
      - name: dc-b
        datastores: [ds-2]
"#,
        )
        .unwrap();
        let cm = Arc::new(SimulatedConnectionManager::from_config(&config));

        let mut index = 0;
        for (dc, count) in disks_per_dc {
            let datacenter = cm.datacenter("vc1", dc).unwrap();
            for _ in 0..*count {
                datacenter.insert_disk(FirstClassDisk {
                    id: format!("fcd-{}", index),
                    name: format!("pvc-{}", index),
                    capacity_mb: 1024,
                    parent: DiskParent::Datastore {
                        datastore: "ds-1".into(),
                    },
                    backing: DiskBacking::File {
                        file_path: format!("[ds-1] fcd/{}.vmdk", index),
                    },
                });
                index += 1;
            }
        }
        cm
    }

    fn ids(resp: &ListVolumesResponse) -> Vec<String> {
        resp.entries.iter().map(|e| e.volume.volume_id.clone()).collect()
    }

    fn expected(range: std::ops::RangeInclusive<usize>) -> Vec<String> {
        range.map(|i| format!("fcd-{}", i)).collect()
    }

    #[tokio::test]
    async fn test_walks_pages_of_three() {
        let paginator = ListPaginator::new(inventory(&[("dc-a", 6), ("dc-b", 4)]));
        let ctx = RequestContext::background();

        let page = paginator.page(&ctx, "", 3).await.unwrap();
        assert_eq!(ids(&page), expected(0..=2));
        assert_eq!(page.next_token, "3");

        let page = paginator.page(&ctx, "3", 3).await.unwrap();
        assert_eq!(ids(&page), expected(3..=5));
        assert_eq!(page.next_token, "6");

        let page = paginator.page(&ctx, "6", 3).await.unwrap();
        assert_eq!(ids(&page), expected(6..=8));
        assert_eq!(page.next_token, "9");

        let page = paginator.page(&ctx, "9", 3).await.unwrap();
        assert_eq!(ids(&page), expected(9..=9));
        assert!(page.next_token.is_empty());
    }

    #[tokio::test]
    async fn test_zero_max_entries_returns_rest() {
        let paginator = ListPaginator::new(inventory(&[("dc-a", 10)]));
        let page = paginator
            .page(&RequestContext::background(), "4", 0)
            .await
            .unwrap();
        assert_eq!(ids(&page), expected(4..=9));
        assert!(page.next_token.is_empty());
    }

    #[tokio::test]
    async fn test_start_beyond_end() {
        let paginator = ListPaginator::new(inventory(&[("dc-a", 10)]));
        let err = paginator
            .page(&RequestContext::background(), "11", 3)
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::Internal);

        // start == total is an empty final page
        let page = paginator
            .page(&RequestContext::background(), "10", 3)
            .await
            .unwrap();
        assert!(page.entries.is_empty());
        assert!(page.next_token.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_token() {
        let paginator = ListPaginator::new(inventory(&[("dc-a", 2)]));
        for token in ["abc", "-1", "1.5"] {
            let err = paginator
                .page(&RequestContext::background(), token, 3)
                .await
                .unwrap_err();
            assert_eq!(err.code(), Code::InvalidArgument, "token {:?}", token);
        }

        let err = paginator
            .page(&RequestContext::background(), "", -2)
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_failing_instance_is_skipped() {
        let cm = inventory(&[("dc-a", 2), ("dc-b", 3)]);
        cm.datacenter("vc1", "dc-a")
            .unwrap()
            .faults()
            .fail(Operation::ListDisks, DriverError::api("ListDisks", "session expired"));

        let page = ListPaginator::new(cm)
            .page(&RequestContext::background(), "", 0)
            .await
            .unwrap();
        assert_eq!(ids(&page), expected(2..=4));
    }

    #[tokio::test]
    async fn test_entries_carry_attributes() {
        let paginator = ListPaginator::new(inventory(&[("dc-b", 1)]));
        let page = paginator
            .page(&RequestContext::background(), "", 0)
            .await
            .unwrap();

        let volume = &page.entries[0].volume;
        assert_eq!(volume.capacity_bytes, 1024 * 1024 * 1024);
        assert_eq!(volume.volume_context[ATTRIBUTE_VCENTER], "vc1");
        assert_eq!(volume.volume_context[ATTRIBUTE_DATACENTER], "dc-b");
    }

    #[tokio::test]
    async fn test_unreportable_capacity_fails_page() {
        let cm = inventory(&[("dc-a", 2)]);
        cm.datacenter("vc1", "dc-a").unwrap().insert_disk(FirstClassDisk {
            id: "fcd-huge".into(),
            name: "pvc-huge".into(),
            capacity_mb: 1 << 43,
            parent: DiskParent::Datastore {
                datastore: "ds-1".into(),
            },
            backing: DiskBacking::File {
                file_path: "[ds-1] fcd/huge.vmdk".into(),
            },
        });
        let paginator = ListPaginator::new(cm);
        let ctx = RequestContext::background();

        // pages that stop short of the oversized disk still succeed
        let page = paginator.page(&ctx, "", 2).await.unwrap();
        assert_eq!(ids(&page), expected(0..=1));

        let err = paginator.page(&ctx, "", 0).await.unwrap_err();
        assert_eq!(err.code(), Code::Internal);
    }

    #[test]
    fn test_page_bounds_arithmetic() {
        let b = PageBounds::compute(0, 1, 5).unwrap();
        assert_eq!(b.range(), 0..1);
        assert_eq!(b.next_token().as_deref(), Some("1"));

        // limit not smaller than the set: everything from start
        let b = PageBounds::compute(2, 5, 5).unwrap();
        assert_eq!(b.range(), 2..5);
        assert_eq!(b.next_token(), None);

        let b = PageBounds::compute(8, 3, 10).unwrap();
        assert_eq!(b.range(), 8..10);
        assert_eq!(b.next_token(), None);
    }
}
