/// The reprogrammable periodic step timer as the controller sees it.
///
/// Reload values are in ticks of [`crate::config::STEP_TIMER_HZ`]. A new
/// reload takes effect for the next period; it does not restart the one in
/// flight.
pub trait StepTimer {
    fn set_reload(&mut self, ticks: u32);
    fn enable(&mut self);
    fn disable(&mut self);
}
