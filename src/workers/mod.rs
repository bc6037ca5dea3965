pub mod finalizer;
pub mod reconciler;
pub mod sweeper;

pub use finalizer::FinalizerWorker;
pub use reconciler::Reconciler;
pub use sweeper::HoldSweeper;
