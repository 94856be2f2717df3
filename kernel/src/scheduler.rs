// Run-to-completion scheduler for the boot hart
// Threads are queued when created and run one after another

use heapless::Deque;

use badgeload::Scheduler;

const MAX_THREADS: usize = 8;

pub struct BootScheduler {
    queue: Deque<(fn(usize), usize), MAX_THREADS>,
}

impl BootScheduler {
    pub const fn new() -> Self {
        Self { queue: Deque::new() }
    }

    /// Run queued threads until none are left; returns how many ran
    pub fn run(&mut self) -> usize {
        let mut count = 0;
        while let Some((entry, arg)) = self.queue.pop_front() {
            entry(arg);
            count += 1;
        }
        count
    }
}

impl Scheduler for BootScheduler {
    fn create_thread(&mut self, entry: fn(usize), arg: usize) -> bool {
        self.queue.push_back((entry, arg)).is_ok()
    }
}
