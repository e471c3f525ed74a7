use scanhead_tmc260::status::Status;

/// Outbound queue for decoded driver status.
///
/// The controller hands over one report per completed status read. Framing,
/// transport and retransmission belong to the packet layer behind the sink.
pub trait TelemetrySink {
    fn queue_status(&mut self, status: &Status);
}
