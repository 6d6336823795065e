//! Zone Resolver
//!
//! Picks the backend instance a new volume is placed on. Topology segments
//! are tried in caller-declared order (requisite before preferred) and the
//! first segment that resolves wins. Without topology the legacy zone/region
//! parameters are used directly.

use crate::config::LabelsConfig;
use crate::controlplane::context::RequestContext;
use crate::controlplane::csi::{Topology, TopologyRequirement};
use crate::domain::disk::{LABEL_ZONE_FAILURE_DOMAIN, LABEL_ZONE_REGION};
use crate::domain::ports::{BackendInstance, ConnectionManagerRef, ZoneQuery};
use crate::error::{Error, Result};
use tracing::{debug, error, info, warn};

/// Placement input for one create request
#[derive(Debug, Clone, Copy)]
pub enum Placement<'a> {
    Topology(&'a TopologyRequirement),
    Legacy { zone: &'a str, region: &'a str },
}

impl<'a> Placement<'a> {
    /// Topology wins when it carries at least one segment list
    pub fn new(topology: Option<&'a TopologyRequirement>, zone: &'a str, region: &'a str) -> Self {
        match topology {
            Some(t) if !t.requisite.is_empty() || !t.preferred.is_empty() => Placement::Topology(t),
            _ => Placement::Legacy { zone, region },
        }
    }
}

/// Resolves a placement to exactly one backend instance
pub struct ZoneResolver {
    connections: ConnectionManagerRef,
    labels: LabelsConfig,
}

impl ZoneResolver {
    pub fn new(connections: ConnectionManagerRef, labels: LabelsConfig) -> Self {
        Self {
            connections,
            labels,
        }
    }

    pub async fn resolve(
        &self,
        ctx: &RequestContext,
        placement: Placement<'_>,
    ) -> Result<BackendInstance> {
        match placement {
            Placement::Topology(requirement) => {
                let (kind, segments) = if !requirement.requisite.is_empty() {
                    ("requisite", &requirement.requisite)
                } else {
                    ("preferred", &requirement.preferred)
                };
                info!("Resolving backend with {} topology ({} segments)", kind, segments.len());
                self.resolve_segments(ctx, segments).await
            }
            Placement::Legacy { zone, region } => {
                info!("Resolving backend with legacy zone={} region={}", zone, region);
                let query = self.query(zone, region);
                self.lookup(ctx, &query).await.map_err(|e| Self::exhausted(zone, e))
            }
        }
    }

    async fn resolve_segments(
        &self,
        ctx: &RequestContext,
        segments: &[Topology],
    ) -> Result<BackendInstance> {
        let mut last_zone = String::new();
        let mut last_err = None;

        for segment in segments {
            let zone = segment.segment(LABEL_ZONE_FAILURE_DOMAIN);
            let region = segment.segment(LABEL_ZONE_REGION);
            let query = self.query(zone, region);

            match self.lookup(ctx, &query).await {
                Ok(instance) => {
                    info!(
                        "Resolved zone={} region={} to {}/{}",
                        zone,
                        region,
                        instance.vc_server,
                        instance.datacenter_name()
                    );
                    return Ok(instance);
                }
                // an aborted request must not move on to the next segment
                Err(e) if e.is_aborted() => return Err(Self::exhausted(zone, e)),
                Err(e) => {
                    debug!("Zone {} region {} did not resolve: {}", zone, region, e);
                    last_zone = zone.to_string();
                    last_err = Some(e);
                }
            }
        }

        let cause = last_err.unwrap_or_else(|| Error::NotFound("no topology segments".into()));
        Err(Self::exhausted(&last_zone, cause))
    }

    async fn lookup(&self, ctx: &RequestContext, query: &ZoneQuery) -> Result<BackendInstance> {
        ctx.run("ResolveZone", self.connections.resolve_by_zone(query))
            .await?
            .map_err(Error::from)
    }

    fn query(&self, zone: &str, region: &str) -> ZoneQuery {
        ZoneQuery {
            zone_category: self.labels.zone.clone(),
            region_category: self.labels.region.clone(),
            zone: zone.to_string(),
            region: region.to_string(),
        }
    }

    fn exhausted(zone: &str, cause: Error) -> Error {
        if cause.is_aborted() {
            warn!("Zone resolution aborted for zone {}: {}", zone, cause);
            return cause;
        }
        let msg = format!("Failed to retrieve VC/DC based on zone {}. Err: {}", zone, cause);
        error!("{}", msg);
        Error::Internal(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::controlplane::backends::simulator::{Operation, SimulatedConnectionManager};
    use crate::controlplane::test_support::LogCapture;
    use crate::error::Code;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn inventory() -> Arc<SimulatedConnectionManager> {
        let config = Config::from_yaml(
            r#"
virtualCenters:
  vc1:
    datacenters:
      - name: dc-a
        zone: zone-a
        region: region-x
      - name: dc-b
        zone: zone-b
        region: region-y
      - name: dc-c
        zone: zone-c
        region: region-z
"#,
        )
        .unwrap();
        Arc::new(SimulatedConnectionManager::from_config(&config))
    }

    fn segment(zone: &str, region: &str) -> Topology {
        let mut segments = BTreeMap::new();
        segments.insert(LABEL_ZONE_FAILURE_DOMAIN.to_string(), zone.to_string());
        segments.insert(LABEL_ZONE_REGION.to_string(), region.to_string());
        Topology { segments }
    }

    fn resolver(cm: &Arc<SimulatedConnectionManager>) -> ZoneResolver {
        ZoneResolver::new(cm.clone(), LabelsConfig::default())
    }

    #[tokio::test]
    async fn test_first_requisite_success_wins() {
        let cm = inventory();
        let requirement = TopologyRequirement {
            requisite: vec![segment("zone-a", "region-y"), segment("zone-b", "region-y")],
            preferred: vec![segment("zone-c", "region-z")],
        };

        let instance = resolver(&cm)
            .resolve(&RequestContext::background(), Placement::Topology(&requirement))
            .await
            .unwrap();

        assert_eq!(instance.datacenter_name(), "dc-b");
        // preferred list never consulted
        assert_eq!(cm.faults().calls(Operation::ResolveZone), 2);
    }

    #[tokio::test]
    async fn test_preferred_used_without_requisite() {
        let cm = inventory();
        let requirement = TopologyRequirement {
            requisite: vec![],
            preferred: vec![segment("zone-c", "region-z"), segment("zone-a", "region-x")],
        };

        let instance = resolver(&cm)
            .resolve(&RequestContext::background(), Placement::Topology(&requirement))
            .await
            .unwrap();
        assert_eq!(instance.datacenter_name(), "dc-c");
        assert_eq!(cm.faults().calls(Operation::ResolveZone), 1);
    }

    #[tokio::test]
    async fn test_failed_requisite_does_not_fall_back_to_preferred() {
        let cm = inventory();
        let requirement = TopologyRequirement {
            requisite: vec![segment("zone-q", "region-x"), segment("zone-r", "region-x")],
            preferred: vec![segment("zone-a", "region-x")],
        };

        let err = resolver(&cm)
            .resolve(&RequestContext::background(), Placement::Topology(&requirement))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::Internal);
        assert!(err.to_string().contains("zone zone-r"));
    }

    #[tokio::test]
    async fn test_legacy_zone() {
        let cm = inventory();
        let instance = resolver(&cm)
            .resolve(
                &RequestContext::background(),
                Placement::new(None, "zone-a", "region-x"),
            )
            .await
            .unwrap();
        assert_eq!(instance.datacenter_name(), "dc-a");

        let err = resolver(&cm)
            .resolve(
                &RequestContext::background(),
                Placement::new(None, "zone-z", ""),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::Internal);
    }

    #[test]
    fn test_empty_topology_is_legacy() {
        let requirement = TopologyRequirement::default();
        assert!(matches!(
            Placement::new(Some(&requirement), "zone-a", ""),
            Placement::Legacy { zone: "zone-a", .. }
        ));
    }

    #[tokio::test]
    async fn test_cancelled_request_stops_iteration() {
        let cm = inventory();
        let requirement = TopologyRequirement {
            requisite: vec![segment("zone-a", "region-x")],
            preferred: vec![],
        };
        let ctx = RequestContext::background();
        ctx.cancel();

        let err = resolver(&cm)
            .resolve(&ctx, Placement::Topology(&requirement))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::Cancelled);
        assert_eq!(cm.faults().calls(Operation::ResolveZone), 0);
    }

    #[tokio::test]
    async fn test_aborted_resolution_is_logged() {
        let (logs, _guard) = LogCapture::install();
        let cm = inventory();
        let requirement = TopologyRequirement {
            requisite: vec![segment("zone-b", "region-y")],
            preferred: vec![],
        };
        let ctx = RequestContext::background();
        ctx.cancel();

        let err = resolver(&cm)
            .resolve(&ctx, Placement::Topology(&requirement))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::Cancelled);

        let err = resolver(&cm)
            .resolve(&ctx, Placement::new(None, "zone-c", ""))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::Cancelled);

        let warnings = logs.lines_at("WARN");
        assert_eq!(warnings.len(), 2, "{}", logs.contents());
        assert!(warnings[0].contains("zone zone-b"));
        assert!(warnings[1].contains("zone zone-c"));
    }
}
