//! Synchronous one-word rendezvous.
//!
//! [`Rendezvous`] pairs one speaker with one listener and transfers a
//! single word between them. Any number of speakers and listeners may be
//! queued at once, but at most one of each is ever mid-handshake; the rest
//! wait behind entry gates. No word is lost, duplicated, or delivered to
//! more than one listener.
//!
//! # Protocol
//!
//! One lock, four conditions, two presence flags, one word slot.
//!
//! 1. **Entry gate** -- a speaker waits on `speaker_gate` while another
//!    speaker is present, then marks itself present; listeners mirror this
//!    with `listener_gate` and their own flag. Separating presence from
//!    handshake signaling is what keeps two speakers from ever racing on
//!    the word slot.
//! 2. **Handshake** -- the speaker waits on `listener_arrived` until a
//!    listener is present; the arriving listener sets its flag and signals
//!    `listener_arrived`. The speaker publishes the word and signals
//!    `speaker_arrived`; the listener wakes and reads it.
//! 3. **Acknowledgment and exit** -- the listener signals
//!    `listener_arrived` a second time to release the speaker from the
//!    handshake, then each side clears its own flag and signals its gate
//!    to admit the next queued peer of the same kind.
//!
//! Ordering between queued speakers (or listeners) follows gate wakeup
//! order and is not guaranteed to be FIFO across gates.

use std::sync::{Arc, Mutex};

use minos_machine::{Lock, Machine};

use crate::condition::Condition;
use crate::hold;

struct ExchangeState {
    speaker_present: bool,
    listener_present: bool,
    /// Valid only between the active speaker's publish and the active
    /// listener's read.
    word: i32,
}

/// A synchronous channel exchanging one `i32` per speak/listen pair.
pub struct Rendezvous {
    machine: Machine,
    lock: Arc<Lock>,
    speaker_gate: Condition,
    listener_gate: Condition,
    /// Signaled on listener arrival and again as the read acknowledgment.
    listener_arrived: Condition,
    speaker_arrived: Condition,
    state: Mutex<ExchangeState>,
}

impl Rendezvous {
    /// Create a rendezvous channel on the given machine.
    #[must_use]
    pub fn new(machine: &Machine) -> Self {
        let lock = Arc::new(Lock::new(machine));
        Self {
            machine: machine.clone(),
            speaker_gate: Condition::new(Arc::clone(&lock)),
            listener_gate: Condition::new(Arc::clone(&lock)),
            listener_arrived: Condition::new(Arc::clone(&lock)),
            speaker_arrived: Condition::new(Arc::clone(&lock)),
            state: Mutex::new(ExchangeState {
                speaker_present: false,
                listener_present: false,
                word: 0,
            }),
            lock,
        }
    }

    /// Wait for a listener and transfer `word` to it.
    ///
    /// Returns only after exactly one listener has consumed the word.
    pub fn speak(&self, word: i32) {
        self.lock.acquire();

        // Entry gate: one speaker mid-handshake at a time.
        while hold(&self.state).speaker_present {
            self.speaker_gate.sleep();
        }
        {
            let mut st = hold(&self.state);
            debug_assert!(!st.speaker_present);
            st.speaker_present = true;
        }

        // Handshake: wait for a listener, then publish.
        while !hold(&self.state).listener_present {
            self.listener_arrived.sleep();
        }
        hold(&self.state).word = word;
        tracing::debug!(thread = %self.machine.current_thread(), word, "spoke");
        self.speaker_arrived.signal();

        // Wait for the listener's acknowledgment that the word was read.
        self.listener_arrived.sleep();

        hold(&self.state).speaker_present = false;
        self.speaker_gate.signal();
        self.lock.release();
    }

    /// Wait for a speaker and return the word it transferred.
    pub fn listen(&self) -> i32 {
        self.lock.acquire();

        // Entry gate: one listener mid-handshake at a time.
        while hold(&self.state).listener_present {
            self.listener_gate.sleep();
        }
        {
            let mut st = hold(&self.state);
            debug_assert!(!st.listener_present);
            st.listener_present = true;
        }

        // Announce arrival; if a speaker is already waiting this wakes it,
        // otherwise the presence flag alone lets the next speaker through.
        self.listener_arrived.signal();
        self.speaker_arrived.sleep();
        let word = hold(&self.state).word;
        tracing::debug!(thread = %self.machine.current_thread(), word, "heard");

        // Acknowledge the read so the speaker can leave the handshake.
        self.listener_arrived.signal();

        hold(&self.state).listener_present = false;
        self.listener_gate.signal();
        self.lock.release();
        word
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn one_word_crosses_over() {
        let machine = Machine::default();
        let channel = Arc::new(Rendezvous::new(&machine));
        let heard = Arc::new(Mutex::new(None));
        machine
            .run(|| {
                let ch = Arc::clone(&channel);
                let speaker = machine.spawn("speaker", move || ch.speak(7)).unwrap();

                let ch = Arc::clone(&channel);
                let h = Arc::clone(&heard);
                let listener = machine
                    .spawn("listener", move || {
                        *h.lock().unwrap() = Some(ch.listen());
                    })
                    .unwrap();

                machine.join(&speaker);
                machine.join(&listener);
            })
            .unwrap();
        assert_eq!(*heard.lock().unwrap(), Some(7));
    }

    #[test]
    fn speak_returns_only_after_its_word_is_consumed() {
        let machine = Machine::default();
        let channel = Arc::new(Rendezvous::new(&machine));
        let consumed = Arc::new(Mutex::new(HashSet::new()));
        machine
            .run(|| {
                let mut handles = Vec::new();
                for word in 1..=3 {
                    let ch = Arc::clone(&channel);
                    let c = Arc::clone(&consumed);
                    handles.push(
                        machine
                            .spawn(format!("speaker-{word}"), move || {
                                ch.speak(word);
                                // By the time speak returns, the paired
                                // listener has recorded the word.
                                assert!(c.lock().unwrap().contains(&word));
                            })
                            .unwrap(),
                    );
                }
                for i in 0..3 {
                    let ch = Arc::clone(&channel);
                    let c = Arc::clone(&consumed);
                    handles.push(
                        machine
                            .spawn(format!("listener-{i}"), move || {
                                let word = ch.listen();
                                c.lock().unwrap().insert(word);
                            })
                            .unwrap(),
                    );
                }
                for th in &handles {
                    machine.join(th);
                }
            })
            .unwrap();
        assert_eq!(*consumed.lock().unwrap(), HashSet::from([1, 2, 3]));
    }

    #[test]
    fn listeners_first_then_speakers() {
        let machine = Machine::default();
        let channel = Arc::new(Rendezvous::new(&machine));
        let heard = Arc::new(Mutex::new(Vec::new()));
        machine
            .run(|| {
                let mut handles = Vec::new();
                for i in 0..4 {
                    let ch = Arc::clone(&channel);
                    let h = Arc::clone(&heard);
                    handles.push(
                        machine
                            .spawn(format!("listener-{i}"), move || {
                                let word = ch.listen();
                                h.lock().unwrap().push(word);
                            })
                            .unwrap(),
                    );
                }
                // Let every listener queue up before any speaker arrives.
                for _ in 0..10 {
                    machine.yield_now();
                }
                for word in 10..14 {
                    let ch = Arc::clone(&channel);
                    handles.push(
                        machine
                            .spawn(format!("speaker-{word}"), move || ch.speak(word))
                            .unwrap(),
                    );
                }
                for th in &handles {
                    machine.join(th);
                }
            })
            .unwrap();
        let mut words = heard.lock().unwrap().clone();
        words.sort_unstable();
        assert_eq!(words, vec![10, 11, 12, 13]);
    }

    #[test]
    fn interleaved_five_by_five_delivers_every_word_once() {
        let machine = Machine::default();
        let channel = Arc::new(Rendezvous::new(&machine));
        let heard = Arc::new(Mutex::new(Vec::new()));
        machine
            .run(|| {
                let speak = |word: i32| {
                    let ch = Arc::clone(&channel);
                    machine
                        .spawn(format!("speak-{word}"), move || ch.speak(word))
                        .unwrap()
                };
                let listen = |i: usize| {
                    let ch = Arc::clone(&channel);
                    let h = Arc::clone(&heard);
                    machine
                        .spawn(format!("listen-{i}"), move || {
                            let word = ch.listen();
                            h.lock().unwrap().push(word);
                        })
                        .unwrap()
                };

                // The classic interleaved fork order.
                let mut handles = vec![speak(1), speak(2), listen(1), speak(3)];
                handles.extend([listen(2), listen(3), listen(4), listen(5)]);
                handles.extend([speak(4), speak(5)]);
                for th in &handles {
                    machine.join(th);
                }
            })
            .unwrap();
        let mut words = heard.lock().unwrap().clone();
        assert_eq!(words.len(), 5, "every listen returned exactly once");
        words.sort_unstable();
        assert_eq!(words, vec![1, 2, 3, 4, 5]);
    }
}
