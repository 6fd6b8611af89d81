//! End-of-run summaries: per-node counters, network totals and the link
//! quality matrix between stations.

use serde::Serialize;
use std::fmt;

use crate::field::Field;
use crate::mac::MacStats;
use crate::net::NetStats;
use crate::radio::RadioStats;
use crate::simulation::signal_calculations::mw_to_dbm;
use crate::simulation::types::RadioId;
use crate::simulation::{Simulation, SimulationStats};

/// Received power above sensitivity mapped onto the full quality scale.
const LINK_QUALITY_SPAN_DB: f64 = 30.0;
pub const LINK_QUALITY_MAX: u8 = 63;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeReport {
    pub node_id: u32,
    pub mac: MacStats,
    pub radio: RadioStats,
    pub net: NetStats,
    /// Packets still waiting in the network queue.
    pub queued: usize,
}

/// Link quality between every pair of stations, from deterministic path
/// loss only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkMatrix {
    /// Node IDs in row/column order.
    pub node_ids: Vec<u32>,
    /// Link quality values [row][col], 0-63. Row transmits, column receives.
    pub values: Vec<Vec<u8>>,
}

impl LinkMatrix {
    pub fn from_field(field: &Field, ids: &[RadioId]) -> Self {
        let values = ids
            .iter()
            .map(|&src| {
                ids.iter()
                    .map(|&dst| if src == dst { 0 } else { link_quality(field, src, dst) })
                    .collect()
            })
            .collect();
        LinkMatrix {
            node_ids: ids.iter().map(|id| id.0).collect(),
            values,
        }
    }

    /// Number of directed links with non-zero quality.
    pub fn links(&self) -> usize {
        self.values.iter().flatten().filter(|&&q| q > 0).count()
    }
}

fn link_quality(field: &Field, src: RadioId, dst: RadioId) -> u8 {
    let (Ok(signal), Some(receiver)) = (field.compute_signal(src, dst), field.radio(dst)) else {
        return 0;
    };
    let margin = signal - mw_to_dbm(receiver.info.properties.sensitivity_mw);
    if margin < 0.0 {
        return 0;
    }
    let scaled = (margin / LINK_QUALITY_SPAN_DB * f64::from(LINK_QUALITY_MAX)).round();
    (scaled as u8).clamp(1, LINK_QUALITY_MAX)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub elapsed_secs: f64,
    pub simulation: SimulationStats,
    pub mac: MacStats,
    pub radio: RadioStats,
    pub net: NetStats,
    pub nodes: Vec<NodeReport>,
    pub links: LinkMatrix,
}

impl Report {
    pub fn collect(sim: &Simulation) -> Self {
        let mut mac = MacStats::default();
        let mut radio = RadioStats::default();
        let mut net = NetStats::default();
        let mut nodes = Vec::new();
        let mut ids = Vec::new();

        for (id, node) in sim.nodes() {
            add_mac(&mut mac, node.mac.stats());
            add_radio(&mut radio, node.radio.stats());
            add_net(&mut net, node.net.stats());
            ids.push(id);
            nodes.push(NodeReport {
                node_id: id.0,
                mac: node.mac.stats().clone(),
                radio: node.radio.stats().clone(),
                net: node.net.stats().clone(),
                queued: node.net.queued(),
            });
        }

        Report {
            elapsed_secs: sim.now().as_secs_f64(),
            simulation: sim.stats().clone(),
            mac,
            radio,
            net,
            nodes,
            links: LinkMatrix::from_field(sim.field(), &ids),
        }
    }

    /// Share of finished unicast exchanges that were acknowledged.
    pub fn delivery_ratio(&self) -> Option<f64> {
        let finished = self.mac.delivered + self.mac.drops;
        (finished > 0).then(|| self.mac.delivered as f64 / finished as f64)
    }
}

fn add_mac(total: &mut MacStats, s: &MacStats) {
    total.broadcasts_sent += s.broadcasts_sent;
    total.unicasts_sent += s.unicasts_sent;
    total.delivered += s.delivered;
    total.rts_sent += s.rts_sent;
    total.cts_sent += s.cts_sent;
    total.acks_sent += s.acks_sent;
    total.retries += s.retries;
    total.drops += s.drops;
    total.duplicates += s.duplicates;
    total.received += s.received;
    total.snooped += s.snooped;
}

fn add_radio(total: &mut RadioStats, s: &RadioStats) {
    total.transmitted += s.transmitted;
    total.delivered += s.delivered;
    total.captured += s.captured;
    total.interfered += s.interfered;
    total.corrupted += s.corrupted;
}

fn add_net(total: &mut NetStats, s: &NetStats) {
    total.enqueued += s.enqueued;
    total.dropped_queue_full += s.dropped_queue_full;
    total.handed_to_mac += s.handed_to_mac;
    total.received += s.received;
    total.snooped += s.snooped;
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "simulated {:.6}s, {} events ({} dropped)", self.elapsed_secs, self.simulation.events, self.simulation.dropped_events)?;
        writeln!(f, "nodes: {}, links: {}", self.nodes.len(), self.links.links())?;
        writeln!(
            f,
            "air: {} transmissions, {} signals, {} frames received, {} captured, {} interfered, {} corrupted",
            self.simulation.transmissions,
            self.simulation.receptions,
            self.radio.delivered,
            self.radio.captured,
            self.radio.interfered,
            self.radio.corrupted
        )?;
        writeln!(
            f,
            "mac: {} broadcast, {} unicast, {} delivered, {} dropped, {} retries, {} RTS, {} CTS, {} ACK, {} duplicates",
            self.mac.broadcasts_sent,
            self.mac.unicasts_sent,
            self.mac.delivered,
            self.mac.drops,
            self.mac.retries,
            self.mac.rts_sent,
            self.mac.cts_sent,
            self.mac.acks_sent,
            self.mac.duplicates
        )?;
        write!(
            f,
            "net: {} enqueued, {} queue-full drops, {} received, {} snooped",
            self.net.enqueued, self.net.dropped_queue_full, self.net.received, self.net.snooped
        )?;
        if let Some(ratio) = self.delivery_ratio() {
            write!(f, "\ndelivery ratio: {:.1}%", ratio * 100.0)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::scene::{SceneFormat, build_simulation, parse_scene};

    const SCENE: &str = r#"{
        "field": { "width": 5000.0, "height": 100.0 },
        "nodes": [
            { "node_id": 0, "position": { "x": 10.0, "y": 50.0 } },
            { "node_id": 1, "position": { "x": 60.0, "y": 50.0 } },
            { "node_id": 2, "position": { "x": 4990.0, "y": 50.0 } }
        ],
        "traffic": [ { "from": 0, "to": 1, "size": 200, "interval_secs": 0.05, "count": 4 } ],
        "duration_secs": 1.0,
        "seed": 7
    }"#;

    #[test]
    fn link_matrix_reflects_distance() {
        let sim = build_simulation(&parse_scene(SCENE, SceneFormat::Json).unwrap()).unwrap();
        let ids: Vec<RadioId> = sim.nodes().map(|(id, _)| id).collect();
        let matrix = LinkMatrix::from_field(sim.field(), &ids);
        assert_eq!(matrix.node_ids, vec![0, 1, 2]);
        assert_eq!(matrix.values[0][0], 0);
        assert!(matrix.values[0][1] > 0);
        assert_eq!(matrix.values[0][1], matrix.values[1][0]);
        assert_eq!(matrix.values[0][2], 0);
        assert_eq!(matrix.links(), 2);
    }

    #[test]
    fn report_totals_match_node_counters() {
        let mut sim = build_simulation(&parse_scene(SCENE, SceneFormat::Json).unwrap()).unwrap();
        sim.run_until(crate::simulation::SimTime::from_millis(1_000)).unwrap();
        let report = Report::collect(&sim);
        assert_eq!(report.nodes.len(), 3);
        assert_eq!(report.mac.delivered, 4);
        assert_eq!(report.delivery_ratio(), Some(1.0));
        assert_eq!(report.nodes[1].net.received, 4);
        assert_eq!(report.mac.acks_sent, report.nodes.iter().map(|n| n.mac.acks_sent).sum::<u64>());
        let text = report.to_string();
        assert!(text.contains("4 delivered"));
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["links"]["node_ids"], serde_json::json!([0, 1, 2]));
    }
}
