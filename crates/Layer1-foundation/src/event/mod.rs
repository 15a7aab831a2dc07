//! Event - 호스팅 프레임워크 생명주기 이벤트
//!
//! 호스팅 프레임워크는 Provider 추가/수정/제거를 임의의 스레드에서 통보한다.
//! 같은 Provider에 대한 이벤트는 순서가 보장되지만, 서로 다른 Provider 사이에는
//! 순서 보장이 없다.
//!
//! ```text
//! hosting framework ──▶ LifecycleEvent ──▶ Whiteboard::handle()
//! ```

pub mod types;

pub use types::LifecycleEvent;
