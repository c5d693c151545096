//! Thread pool, parallel loops and cyclic execution on dedicated OS threads.

mod channel;
mod cyclic;
mod parfor;
mod pool;
mod queue;
mod worker;

pub use channel::TaskHandle;
pub use cyclic::{CyclicExecutor, hertz, kilohertz, millihertz};
pub use parfor::{Scope, ScopedTask};
pub use pool::ThreadPool;
