//! Transfer accounting reported by the sender when a run completes.

use std::fmt;
use std::time::Duration;

/// Counters accumulated over one transfer.
#[derive(Debug, Clone, Default)]
pub struct TransferStats {
    /// Every datagram put on the wire, control and data alike.
    pub packets_sent: u64,
    /// DATA datagrams put on the wire.
    pub data_packets_sent: u64,
    /// DATA datagrams suppressed by the loss hook.
    pub packets_dropped: u64,
    /// DATA datagrams sent while repairing a blast.
    pub retransmits: u64,
    /// Blasts initiated.
    pub blasts: u64,
    /// File bytes carried by the transfer.
    pub bytes_total: u64,
    /// Wall-clock duration of the run.
    pub elapsed: Duration,
}

impl TransferStats {
    /// Payload throughput in megabits per second.
    pub fn throughput_mbps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            (self.bytes_total as f64 * 8.0) / secs / 1e6
        } else {
            0.0
        }
    }
}

impl fmt::Display for TransferStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let loss_pct = if self.data_packets_sent + self.packets_dropped > 0 {
            self.packets_dropped as f64 * 100.0
                / (self.data_packets_sent + self.packets_dropped) as f64
        } else {
            0.0
        };
        writeln!(f, "=== Transfer Statistics ===")?;
        writeln!(f, "Total packets sent: {}", self.packets_sent)?;
        writeln!(f, "Data packets sent:  {}", self.data_packets_sent)?;
        writeln!(f, "Packets dropped:    {} ({:.2}%)", self.packets_dropped, loss_pct)?;
        writeln!(f, "Retransmissions:    {}", self.retransmits)?;
        writeln!(f, "Total blasts:       {}", self.blasts)?;
        writeln!(f, "Total time:         {:.3} s", self.elapsed.as_secs_f64())?;
        write!(f, "Throughput:         {:.2} Mbps", self.throughput_mbps())
    }
}
