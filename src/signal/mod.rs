mod adapter;
mod debounce;

pub use adapter::{MotionEvent, MotionEventKind, RawSignal, SignalAdapter, SignalSource};
pub use debounce::{DebounceLayer, DebouncedTransition, TransitionDirection};
