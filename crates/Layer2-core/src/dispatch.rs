//! Serial Dispatch - 인스턴스당 하나의 상호 배제 영역
//!
//! 상태 변경과 그 결과로 생기는 콜백(sink 호출)을 하나의 재진입 가능한 락
//! 아래에서 직렬화한다.
//!
//! ```text
//! thread A ── update(f) ──▶ [lock] f(&mut state, &mut outbox) ──▶ drain queue ──▶ [unlock]
//!                                         │                           │
//!                                         ▼                           ▼
//!                                  jobs appended            job() may re-enter update()
//!                                                          (same thread: enqueue only)
//! ```
//!
//! - 다른 스레드는 락을 기다린다. 따라서 상태 변경과 콜백 전달은 원자적이다.
//! - 콜백 안에서 같은 인스턴스를 다시 호출하면 상태만 바뀌고 새 작업은 큐 뒤에
//!   붙는다. 바깥 drain 루프가 FIFO 순서로 전달한다.
//! - 콜백이 실행되는 동안에는 `RefCell` 빌림이 없으므로 `read`도 안전하다.

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use std::cell::RefCell;
use std::collections::VecDeque;

/// 큐에 쌓이는 콜백
pub(crate) type Job = Box<dyn FnOnce() + Send>;

/// 상태 변경 중에 예약된 콜백 모음
#[derive(Default)]
pub(crate) struct Outbox {
    jobs: Vec<Job>,
}

impl Outbox {
    pub(crate) fn push(&mut self, job: impl FnOnce() + Send + 'static) {
        self.jobs.push(Box::new(job));
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

struct Slot<S> {
    state: S,
    queue: VecDeque<Job>,
    draining: bool,
}

/// 상태 + 직렬 작업 큐
pub(crate) struct SerialCell<S> {
    lock: ReentrantMutex<RefCell<Slot<S>>>,
}

impl<S: Send> SerialCell<S> {
    pub(crate) fn new(state: S) -> Self {
        Self {
            lock: ReentrantMutex::new(RefCell::new(Slot {
                state,
                queue: VecDeque::new(),
                draining: false,
            })),
        }
    }

    /// 상태를 변경하고, 예약된 콜백을 모두 전달한 뒤 반환
    ///
    /// 재진입 호출이면 콜백은 바깥 호출이 전달한다.
    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut S, &mut Outbox) -> R) -> R {
        let guard = self.lock.lock();

        let result = {
            let mut slot = guard.borrow_mut();
            let mut outbox = Outbox::default();
            let result = f(&mut slot.state, &mut outbox);
            slot.queue.extend(outbox.jobs);
            result
        };

        drain(&guard);
        result
    }

    /// 상태 읽기
    pub(crate) fn read<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        let guard = self.lock.lock();
        let slot = guard.borrow();
        f(&slot.state)
    }
}

fn drain<S>(guard: &ReentrantMutexGuard<'_, RefCell<Slot<S>>>) {
    {
        let mut slot = guard.borrow_mut();
        if slot.draining {
            return;
        }
        slot.draining = true;
    }

    // 콜백이 panic해도 draining 플래그는 복구한다
    struct Reset<'a, 'g, S>(&'a ReentrantMutexGuard<'g, RefCell<Slot<S>>>);
    impl<S> Drop for Reset<'_, '_, S> {
        fn drop(&mut self) {
            self.0.borrow_mut().draining = false;
        }
    }
    let _reset = Reset(guard);

    loop {
        let job = guard.borrow_mut().queue.pop_front();
        match job {
            Some(job) => job(),
            None => break,
        }
    }
}
