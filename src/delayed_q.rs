// implements a message queue with discrete message delays

use std::collections::VecDeque;

// delayed message type

#[derive(Clone)]
pub struct DelayedMsg<MsgType> {
    pub t: u64,
    pub msg: MsgType,
}

// timed message type

/*
    In TimedMsg, `t` stands for the timestamp at which the message should be made available,
    whereas `t` in DelayedMsg stands for the delay of the message from the time of issue.
 */

struct TimedMsg<MsgType> {
    t: u64,
    msg: MsgType,
}

// delayed message queue

pub struct DelayedQ<MsgType> {
    time: u64,
    q: VecDeque<TimedMsg<MsgType>>,
}

impl<MsgType> Default for DelayedQ<MsgType> {
    fn default() -> Self {
        Self::new()
    }
}

impl<MsgType> DelayedQ<MsgType> {
    pub fn new() -> Self {
        DelayedQ { time: 0, q: VecDeque::new() }
    }
    /// messages with equal timestamps come out in the order they were sent
    pub fn send(&mut self, msg: DelayedMsg<MsgType>) {
        let t = self.time + msg.t;
        let timed_msg = TimedMsg { t, msg: msg.msg };
        match self.q.back() {
            Some(last) if last.t > t => {
                let i = self.q.iter().position(|m| m.t > t).unwrap_or(self.q.len());
                self.q.insert(i, timed_msg);
            }
            _ => self.q.push_back(timed_msg),
        }
    }
    pub fn try_fetch(&mut self) -> Option<MsgType> {
        match self.q.front() {
            Some(m) if m.t <= self.time => self.q.pop_front().map(|m| m.msg),
            _ => None,
        }
    }
    pub fn update_time(&mut self, new_time: u64) {
        self.time = new_time;
    }
    pub fn time(&self) -> u64 {
        self.time
    }
    pub fn is_empty(&self) -> bool {
        self.q.is_empty()
    }
}
