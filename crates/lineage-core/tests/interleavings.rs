use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    thread,
};

use lineage_core::{
    Pid,
    event::{ClientId, Event},
    file::FileInfo,
    ingest::start_event_ingestor,
    process::{ProcessKey, ProcessRecord},
    process_source::{PID_0, ProcessSource, SourceError},
    process_tree::ProcessTree,
};
use proptest::prelude::*;

struct Init;

impl ProcessSource for Init {
    fn enumerate(&self) -> Result<HashMap<Pid, Vec<ProcessRecord>>, SourceError> {
        Ok(HashMap::from([(PID_0, vec![record(init(), key(0, 0))])]))
    }
}

fn key(pid: i32, version: u32) -> ProcessKey {
    ProcessKey::new(Pid::from_raw(pid), version)
}

fn init() -> ProcessKey {
    key(1, 0)
}

fn record(key: ProcessKey, parent: ProcessKey) -> ProcessRecord {
    let file = FileInfo::lightweight(format!("/usr/bin/p{}-{}", key.pid, key.version));
    ProcessRecord::new(key, parent, Arc::new(file))
}

/// What happens to a running process, picked by index among the live ones.
#[derive(Debug, Clone, Copy)]
enum Step {
    Fork(usize),
    Exec(usize),
    Exit(usize),
    Other(usize),
}

fn step_strategy() -> impl Strategy<Value = Step> {
    prop_oneof![
        any::<usize>().prop_map(Step::Fork),
        any::<usize>().prop_map(Step::Exec),
        any::<usize>().prop_map(Step::Exit),
        any::<usize>().prop_map(Step::Other),
    ]
}

fn steps_strategy() -> impl Strategy<Value = Vec<Step>> {
    prop::collection::vec(step_strategy(), 0..200)
}

/// A plausible history of the host.
struct History {
    events: Vec<Event>,
    /// Processes still running at the end.
    live: Vec<ProcessKey>,
    /// Parent of every incarnation created, the replaced one for exec.
    parents: HashMap<ProcessKey, ProcessKey>,
}

impl History {
    fn generate(steps: &[Step]) -> Self {
        let mut live = vec![init()];
        let mut parents = HashMap::new();
        let mut next_pid = 2;
        let mut events = Vec::new();
        for (n, step) in steps.iter().enumerate() {
            let t = n as u64 + 1;
            match *step {
                Step::Fork(subject) => {
                    let parent = live[subject % live.len()];
                    let child = key(next_pid, 1);
                    next_pid += 1;
                    events.push(Event::fork(t, record(child, parent)));
                    parents.insert(child, parent);
                    live.push(child);
                }
                Step::Exec(subject) => {
                    let subject = subject % live.len();
                    let old = live[subject];
                    let new = key(old.pid.as_raw(), old.version + 1);
                    events.push(Event::exec(t, old, record(new, old)));
                    parents.insert(new, old);
                    live[subject] = new;
                }
                // init never exits
                Step::Exit(subject) if live[subject % live.len()].pid.as_raw() != 1 => {
                    let subject = subject % live.len();
                    events.push(Event::exit(t, live.swap_remove(subject)));
                }
                Step::Exit(subject) | Step::Other(subject) => {
                    events.push(Event::other(t, live[subject % live.len()]));
                }
            }
        }
        Self {
            events,
            live,
            parents,
        }
    }

    fn ancestors(&self, key: ProcessKey) -> impl Iterator<Item = ProcessKey> + '_ {
        std::iter::successors(self.parents.get(&key).copied(), |key| {
            self.parents.get(key).copied()
        })
    }

    /// Live processes and every incarnation they descend from.
    fn expected(&self) -> HashSet<ProcessKey> {
        let mut expected: HashSet<ProcessKey> = self.live.iter().copied().collect();
        for key in &self.live {
            expected.extend(self.ancestors(*key));
        }
        expected
    }

    /// The tree holds exactly the expected records, each retained once per
    /// expected descendant and tombstoned unless still running.
    fn check(&self, tree: &ProcessTree) -> Result<(), TestCaseError> {
        prop_assert!(tree.pending_deletions().is_empty());
        let expected = self.expected();
        prop_assert_eq!(tree.size(), expected.len());
        for key in &expected {
            let record = tree.get(key);
            prop_assert!(record.is_some(), "{} missing", key);
            let record = record.unwrap();
            prop_assert_eq!(record.is_tombstoned(), !self.live.contains(key), "{}", key);
            let descendants = expected
                .iter()
                .filter(|other| self.ancestors(**other).any(|ancestor| ancestor == *key))
                .count();
            prop_assert_eq!(record.retain_count() as usize, descendants, "{}", key);
        }
        Ok(())
    }
}

/// Both clients see the whole history, each in its own order. `order` picks
/// which client goes next, auth first once it runs out.
fn deliver(tree: &ProcessTree, order: &[bool], events: &[Event]) {
    let mut order = order.iter().copied();
    let (mut auth, mut notify) = (0, 0);
    while auth < events.len() || notify < events.len() {
        let pick_auth =
            notify == events.len() || (auth < events.len() && order.next().unwrap_or(true));
        if pick_auth {
            tree.add_event(events[auth].clone(), ClientId::Auth);
            auth += 1;
        } else {
            tree.add_event(events[notify].clone(), ClientId::Notify);
            notify += 1;
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn no_leak_under_any_interleaving(
        steps in steps_strategy(),
        order in prop::collection::vec(prop::bool::ANY, 0..400),
    ) {
        let history = History::generate(&steps);
        let tree = ProcessTree::new([ClientId::Auth, ClientId::Notify], &Init);

        deliver(&tree, &order, &history.events);

        history.check(&tree)?;
    }

    #[test]
    fn clients_on_their_own_threads(steps in steps_strategy()) {
        let history = Arc::new(History::generate(&steps));
        let tree = Arc::new(ProcessTree::new([ClientId::Auth, ClientId::Notify], &Init));

        let handles: Vec<_> = [ClientId::Auth, ClientId::Notify]
            .into_iter()
            .map(|client| {
                let tree = tree.clone();
                let history = history.clone();
                thread::spawn(move || {
                    for event in &history.events {
                        tree.add_event(event.clone(), client);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        history.check(&tree)?;
    }
}

#[test]
fn lagging_client_keeps_ancestry_resolvable() {
    let tree = ProcessTree::new([ClientId::Auth, ClientId::Notify], &Init);
    let shell = key(10, 1);
    let tool = key(11, 1);

    // auth sees the shell start and exit
    tree.add_event(Event::fork(1, record(shell, init())), ClientId::Auth);
    tree.add_event(Event::exit(3, shell), ClientId::Auth);
    assert!(tree.get(&shell).is_some());

    // notify still has to report a fork that happened before the exit
    tree.add_event(Event::fork(1, record(shell, init())), ClientId::Notify);
    tree.add_event(Event::fork(2, record(tool, shell)), ClientId::Notify);
    assert_eq!(tree.get(&tool).unwrap().parent(), Some(shell));
    assert_eq!(tree.parent_names(&tool), vec!["p10-1", "p1-0"]);

    tree.add_event(Event::exit(3, shell), ClientId::Notify);
    // exited but still needed by its child
    let record = tree.get(&shell).unwrap();
    assert!(record.is_tombstoned());
    assert_eq!(record.retain_count(), 1);

    tree.add_event(Event::exit(4, tool), ClientId::Notify);
    tree.add_event(Event::exit(4, tool), ClientId::Auth);
    assert!(tree.get(&tool).is_none());
    assert!(tree.get(&shell).is_none());
    assert_eq!(tree.size(), 1);
    assert_eq!(tree.get(&init()).unwrap().retain_count(), 0);
}

#[test]
fn exec_chain_is_released_with_its_last_descendant() {
    let tree = ProcessTree::new([ClientId::Auth], &Init);
    let p = key(10, 1);
    let c = key(11, 1);
    tree.add_event(Event::fork(0, record(p, init())), ClientId::Auth);

    tree.add_event(Event::fork(1, record(c, p)), ClientId::Auth);
    assert_eq!(tree.get(&c).unwrap().parent(), Some(p));
    assert!(tree.get(&p).unwrap().is_retained());

    tree.add_event(Event::exit(2, c), ClientId::Auth);
    assert!(!tree.get(&p).unwrap().is_retained());
    assert!(tree.get(&c).is_none());

    let p2 = key(10, 2);
    tree.add_event(Event::exec(3, p, record(p2, p)), ClientId::Auth);
    assert_eq!(tree.get(&p2).unwrap().parent(), Some(p));
    let old = tree.get(&p).unwrap();
    assert!(old.is_tombstoned());
    assert_eq!(old.retain_count(), 1);

    tree.add_event(Event::exit(4, p2), ClientId::Auth);
    assert!(tree.get(&p2).is_none());
    assert!(tree.get(&p).is_none());
    assert_eq!(tree.size(), 1);
}

#[tokio::test]
async fn ingestor_matches_direct_application() {
    let steps: Vec<Step> = (0..100)
        .map(|n| match n % 5 {
            0 | 1 => Step::Fork(n * 7),
            2 => Step::Exec(n * 3),
            3 => Step::Exit(n * 11),
            _ => Step::Other(n),
        })
        .collect();
    let history = History::generate(&steps);

    let tree = Arc::new(ProcessTree::new([ClientId::Auth], &Init));
    let handle = start_event_ingestor(tree.clone());
    for event in history.events.iter().cloned() {
        handle.send(ClientId::Auth, event).unwrap();
    }
    handle.flush().await.unwrap();

    assert_eq!(tree.size(), history.expected().len());
    assert!(tree.pending_deletions().is_empty());
}
