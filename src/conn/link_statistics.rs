use std::sync::atomic::{AtomicU64, Ordering};

/// Counters of a dual-channel link, updated concurrently by the send and
/// receive handlers and the supervisor.
#[derive(Debug)]
pub struct LinkStatistics {
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    matched: AtomicU64,
    unsolicited: AtomicU64,
    heartbeats_sent: AtomicU64,
    heartbeats_missed: AtomicU64,
    reconnects: AtomicU64,
    sign_ons: AtomicU64,
    created_at: time::OffsetDateTime,
}

impl Default for LinkStatistics {
    fn default() -> Self {
        Self {
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            matched: AtomicU64::new(0),
            unsolicited: AtomicU64::new(0),
            heartbeats_sent: AtomicU64::new(0),
            heartbeats_missed: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            sign_ons: AtomicU64::new(0),
            created_at: time::OffsetDateTime::now_utc(),
        }
    }
}

impl LinkStatistics {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn add_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn add_matched(&self) {
        self.matched.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn add_unsolicited(&self) {
        self.unsolicited.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn add_heartbeat_sent(&self) {
        self.heartbeats_sent.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn add_heartbeat_missed(&self) {
        self.heartbeats_missed.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn add_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn add_sign_on(&self) {
        self.sign_ons.fetch_add(1, Ordering::Relaxed);
    }

    /// Messages written to the send channel.
    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }

    /// Messages read off the receive channel.
    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    /// Received messages that completed a pending request.
    pub fn matched(&self) -> u64 {
        self.matched.load(Ordering::Relaxed)
    }

    /// Received messages with no pending request, including late
    /// responses and peer-initiated echoes.
    pub fn unsolicited(&self) -> u64 {
        self.unsolicited.load(Ordering::Relaxed)
    }

    /// Echo tests sent, scheduled and write-idle-triggered alike.
    pub fn heartbeats_sent(&self) -> u64 {
        self.heartbeats_sent.load(Ordering::Relaxed)
    }

    /// Echo tests that were not answered within their deadline.
    pub fn heartbeats_missed(&self) -> u64 {
        self.heartbeats_missed.load(Ordering::Relaxed)
    }

    /// Channel reconnections performed.
    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    /// Sign-on exchanges completed.
    pub fn sign_ons(&self) -> u64 {
        self.sign_ons.load(Ordering::Relaxed)
    }

    /// When this link was created.
    pub fn created_at(&self) -> time::OffsetDateTime {
        self.created_at
    }
}

impl std::fmt::Display for LinkStatistics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Link statistics")?;
        writeln!(f, "Created at:          {}", self.created_at)?;
        writeln!(f, "Messages sent:       {}", self.messages_sent())?;
        writeln!(f, "Messages received:   {}", self.messages_received())?;
        writeln!(f, "  - matched:         {}", self.matched())?;
        writeln!(f, "  - unsolicited:     {}", self.unsolicited())?;
        writeln!(f, "Heartbeats sent:     {}", self.heartbeats_sent())?;
        writeln!(f, "Heartbeats missed:   {}", self.heartbeats_missed())?;
        writeln!(f, "Reconnects:          {}", self.reconnects())?;
        writeln!(f, "Sign-ons:            {}", self.sign_ons())?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::LinkStatistics;

    #[test]
    fn test_statistics() {
        let stat = LinkStatistics::new();
        stat.add_sent();
        stat.add_sent();
        stat.add_received();
        stat.add_matched();
        stat.add_unsolicited();
        assert_eq!(stat.messages_sent(), 2);
        assert_eq!(stat.messages_received(), 1);
        assert_eq!(stat.matched(), 1);
        assert_eq!(stat.unsolicited(), 1);
        println!("{stat}");
    }
}
