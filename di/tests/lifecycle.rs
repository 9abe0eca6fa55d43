use fibre_di::{BoxError, Container, Context, Error, Hook, HookState, Hooks, Interrupt, Phase};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{
  atomic::{AtomicUsize, Ordering},
  Arc, Mutex,
};
use std::thread;
use std::time::Duration;

// --- Test Fixtures ---

type Journal = Arc<Mutex<Vec<String>>>;

fn record(journal: &Journal, entry: String) {
  journal.lock().unwrap().push(entry);
}

fn entries(journal: &Journal) -> Vec<String> {
  journal.lock().unwrap().clone()
}

// A hook that records its start and stop, and optionally fails to start.
fn tracked_hook(journal: &Journal, name: &str, fail_start: bool) -> Hook {
  let (start_log, stop_log) = (Arc::clone(journal), Arc::clone(journal));
  let (start_name, stop_name) = (name.to_string(), name.to_string());
  Hook::new()
    .on_start(move |_| -> Result<(), BoxError> {
      record(&start_log, format!("start({})", start_name));
      if fail_start {
        Err(format!("{} could not start", start_name).into())
      } else {
        Ok(())
      }
    })
    .on_stop(move |_| -> Result<(), BoxError> {
      record(&stop_log, format!("stop({})", stop_name));
      Ok(())
    })
}

// Appends `count` hooks through one invoke; hook `fail_at` fails to start.
fn container_with_hooks(journal: &Journal, count: usize, fail_at: Option<usize>) -> Container {
  let container = Container::new();
  container
    .invoke(|hooks: Hooks| -> Result<(), BoxError> {
      for i in 0..count {
        hooks.append(tracked_hook(journal, &i.to_string(), fail_at == Some(i)))?;
      }
      Ok(())
    })
    .unwrap();
  container
}

// --- Lifecycle Tests ---

#[test]
fn test_start_in_order_and_stop_in_reverse() {
  // Arrange
  let journal: Journal = Arc::default();
  let container = container_with_hooks(&journal, 4, None);

  // Act
  container.start().unwrap();
  container.stop().unwrap();

  // Assert
  assert_eq!(
    entries(&journal),
    vec![
      "start(0)", "start(1)", "start(2)", "start(3)", "stop(3)", "stop(2)", "stop(1)", "stop(0)"
    ]
  );
  assert_eq!(container.phase(), Phase::Stopped);
  assert!(container
    .hook_states()
    .iter()
    .all(|(_, state)| *state == HookState::Stopped));
}

#[test]
fn test_start_failure_unwinds_only_started_hooks() {
  // Arrange
  let journal: Journal = Arc::default();
  let container = container_with_hooks(&journal, 4, Some(2));

  // Act
  let start_err = container.start().unwrap_err();
  let phase_after_start = container.phase();
  container.stop().unwrap();

  // Assert
  match start_err {
    Error::StartFailed { index, cause, .. } => {
      assert_eq!(index, 2);
      assert_eq!(cause.to_string(), "2 could not start");
    }
    other => panic!("expected a start failure, got {other}"),
  }
  assert_eq!(phase_after_start, Phase::StartFailed);
  assert_eq!(
    entries(&journal),
    vec!["start(0)", "start(1)", "start(2)", "stop(1)", "stop(0)"]
  );
  let states: Vec<HookState> = container.hook_states().into_iter().map(|(_, s)| s).collect();
  assert_eq!(
    states,
    vec![
      HookState::Stopped,
      HookState::Stopped,
      HookState::StartFailed,
      HookState::Pending
    ]
  );
}

#[test]
fn test_dependent_hooks_stop_before_their_dependencies() {
  // A server depends on a database. The database's hook is appended first
  // because it is constructed first, so it starts first and stops last.
  struct Database;
  struct Server {
    _db: Arc<Database>,
  }

  // Arrange
  let journal: Journal = Arc::default();
  let mut container = Container::new();

  let log = Arc::clone(&journal);
  container
    .provide(move |hooks: Hooks| -> Result<Database, BoxError> {
      hooks.append(tracked_hook(&log, "database", false))?;
      Ok(Database)
    })
    .unwrap();
  let log = Arc::clone(&journal);
  container
    .provide(move |db: Arc<Database>, hooks: Hooks| -> Result<Server, BoxError> {
      hooks.append(tracked_hook(&log, "server", false))?;
      Ok(Server { _db: db })
    })
    .unwrap();

  // Act
  container.resolve::<Server>().unwrap();
  container.start().unwrap();
  container.stop().unwrap();

  // Assert
  assert_eq!(
    entries(&journal),
    vec![
      "start(database)",
      "start(server)",
      "stop(server)",
      "stop(database)"
    ]
  );
  let owners: Vec<String> = container.hook_states().into_iter().map(|(o, _)| o).collect();
  assert_eq!(owners.len(), 2);
  assert_ne!(owners[0], owners[1], "each hook is attributed to its own provider");
}

#[test]
fn test_stop_attempts_every_hook_and_aggregates_failures() {
  // Arrange
  let journal: Journal = Arc::default();
  let container = Container::new();
  let log = Arc::clone(&journal);
  container
    .invoke(move |hooks: Hooks| -> Result<(), BoxError> {
      hooks.append(tracked_hook(&log, "first", false))?;
      hooks.append(Hook::new().on_stop(|_| Err::<(), BoxError>("socket stuck".into())))?;
      hooks.append(tracked_hook(&log, "third", false))?;
      hooks.append(Hook::new().on_stop(|_| Err::<(), BoxError>("flush failed".into())))?;
      Ok(())
    })
    .unwrap();
  container.start().unwrap();

  // Act
  let err = container.stop().unwrap_err();

  // Assert
  match &err {
    Error::StopFailed { failures } => {
      let summary: Vec<(usize, String)> = failures
        .iter()
        .map(|f| (f.index, f.cause.to_string()))
        .collect();
      assert_eq!(
        summary,
        vec![(3, "flush failed".to_string()), (1, "socket stuck".to_string())]
      );
    }
    other => panic!("expected aggregated stop failures, got {other}"),
  }
  assert!(err.to_string().starts_with("2 stop hook(s) failed"));
  assert_eq!(
    entries(&journal),
    vec!["start(first)", "start(third)", "stop(third)", "stop(first)"]
  );
}

#[test]
fn test_hooks_cannot_be_appended_after_start() {
  // Arrange
  let container = Container::new();
  container.start().unwrap();

  // Act
  let err = container
    .invoke(|hooks: Hooks| hooks.append(Hook::new()))
    .unwrap_err();

  // Assert
  match err {
    Error::InvokeFailed { cause, .. } => {
      let closed = cause.downcast_ref::<Error>().expect("cause is a container error");
      assert!(matches!(closed, Error::HooksClosed { phase: Phase::Running }));
    }
    other => panic!("expected the invoked function to fail, got {other}"),
  }
}

#[test]
fn test_start_twice_is_rejected() {
  // Arrange
  let container = Container::new();
  container.start().unwrap();

  // Act
  let err = container.start().unwrap_err();

  // Assert
  assert!(matches!(
    err,
    Error::InvalidPhase {
      operation: "start",
      phase: Phase::Running
    }
  ));
}

#[test]
fn test_start_timeout_halts_before_the_next_hook() {
  // Arrange
  let journal: Journal = Arc::default();
  let container = Container::builder()
    .start_timeout(Duration::from_millis(20))
    .build()
    .unwrap();
  let log = Arc::clone(&journal);
  container
    .invoke(move |hooks: Hooks| -> Result<(), BoxError> {
      let slow_log = Arc::clone(&log);
      hooks.append(Hook::new().on_start(move |_| -> Result<(), BoxError> {
        thread::sleep(Duration::from_millis(60));
        record(&slow_log, "start(slow)".to_string());
        Ok(())
      }))?;
      hooks.append(tracked_hook(&log, "never", false))?;
      Ok(())
    })
    .unwrap();

  // Act
  let err = container.start().unwrap_err();

  // Assert
  match err {
    Error::StartFailed { index, cause, .. } => {
      assert_eq!(index, 1);
      assert_eq!(
        cause.downcast_ref::<Interrupt>(),
        Some(&Interrupt::DeadlineExceeded)
      );
    }
    other => panic!("expected a timed-out start, got {other}"),
  }
  assert_eq!(entries(&journal), vec!["start(slow)"]);

  container.stop().unwrap();
  assert_eq!(
    container.hook_states()[1].1,
    HookState::Pending,
    "a hook that never started is never stopped"
  );
}

#[test]
fn test_hooks_see_the_callers_context() {
  // Arrange
  let container = Container::new();
  let seen: Arc<Mutex<Option<bool>>> = Arc::default();
  let slot = Arc::clone(&seen);
  container
    .invoke(move |hooks: Hooks| {
      hooks.append(Hook::new().on_start(move |ctx: &Context| -> Result<(), BoxError> {
        *slot.lock().unwrap() = Some(ctx.deadline().is_some());
        Ok(())
      }))
    })
    .unwrap();

  // Act
  container
    .start_with(&Context::with_timeout(Duration::from_secs(30)))
    .unwrap();

  // Assert
  assert_eq!(*seen.lock().unwrap(), Some(true));
}

#[test]
fn test_stop_without_start_is_a_no_op() {
  // Arrange
  let journal: Journal = Arc::default();
  let container = container_with_hooks(&journal, 2, None);

  // Act
  container.stop().unwrap();

  // Assert
  assert!(entries(&journal).is_empty());
  assert_eq!(container.phase(), Phase::Stopped);
}

#[test]
fn test_hooks_of_failed_constructions_never_run() {
  // Arrange
  struct Db;
  let starts = Arc::new(AtomicUsize::new(0));
  let mut container = Container::new();
  let counter = Arc::clone(&starts);
  container
    .provide(move |hooks: Hooks| -> Result<Db, BoxError> {
      let counter = Arc::clone(&counter);
      hooks.append(Hook::new().on_start(move |_| -> Result<(), BoxError> {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
      }))?;
      Err("db unreachable".into())
    })
    .unwrap();

  // Act
  assert!(container.resolve::<Db>().is_err());
  assert!(container.resolve::<Db>().is_err());
  container.start().unwrap();

  // Assert
  assert!(container.hook_states().is_empty());
  assert_eq!(starts.load(Ordering::SeqCst), 0);
}

#[test]
fn test_retried_construction_registers_its_hooks_once() {
  // Arrange
  struct Flaky;
  let journal: Journal = Arc::default();
  let attempts = Arc::new(AtomicUsize::new(0));
  let mut container = Container::new();
  let (log, counter) = (Arc::clone(&journal), Arc::clone(&attempts));
  container
    .provide(move |hooks: Hooks| -> Result<Flaky, BoxError> {
      hooks.append(tracked_hook(&log, "flaky", false))?;
      if counter.fetch_add(1, Ordering::SeqCst) == 0 {
        return Err("warming up".into());
      }
      Ok(Flaky)
    })
    .unwrap();

  // Act
  assert!(container.resolve::<Flaky>().is_err());
  container.resolve::<Flaky>().unwrap();
  container.start().unwrap();
  container.stop().unwrap();

  // Assert
  assert_eq!(attempts.load(Ordering::SeqCst), 2);
  assert_eq!(container.hook_states().len(), 1);
  assert_eq!(entries(&journal), vec!["start(flaky)", "stop(flaky)"]);
}

#[test]
fn test_failed_invoke_drops_its_hooks() {
  // Arrange
  let journal: Journal = Arc::default();
  let container = Container::new();

  // Act
  let err = container
    .invoke(|hooks: Hooks| -> Result<(), BoxError> {
      hooks.append(tracked_hook(&journal, "orphan", false))?;
      Err("bad flags".into())
    })
    .unwrap_err();
  container.start().unwrap();

  // Assert
  assert!(matches!(err, Error::InvokeFailed { .. }));
  assert!(container.hook_states().is_empty());
  assert!(entries(&journal).is_empty());
}

#[test]
fn test_panicking_start_hook_can_still_be_unwound() {
  // Arrange
  let journal: Journal = Arc::default();
  let container = Container::new();
  container
    .invoke(|hooks: Hooks| -> Result<(), BoxError> {
      hooks.append(tracked_hook(&journal, "db", false))?;
      hooks.append(Hook::new().on_start(|_| -> Result<(), BoxError> {
        panic!("listener exploded")
      }))?;
      hooks.append(tracked_hook(&journal, "never", false))?;
      Ok(())
    })
    .unwrap();

  // Act
  let outcome = panic::catch_unwind(AssertUnwindSafe(|| container.start()));
  let phase_after_panic = container.phase();
  container.stop().unwrap();

  // Assert
  assert!(outcome.is_err());
  assert_eq!(phase_after_panic, Phase::StartFailed);
  assert_eq!(entries(&journal), vec!["start(db)", "stop(db)"]);
  let states: Vec<HookState> = container.hook_states().into_iter().map(|(_, s)| s).collect();
  assert_eq!(
    states,
    vec![HookState::Stopped, HookState::StartFailed, HookState::Pending]
  );
}

#[test]
fn test_panicking_stop_hook_settles_the_lifecycle() {
  // Arrange
  let journal: Journal = Arc::default();
  let container = Container::new();
  container
    .invoke(|hooks: Hooks| -> Result<(), BoxError> {
      hooks.append(tracked_hook(&journal, "db", false))?;
      hooks.append(Hook::new().on_stop(|_| -> Result<(), BoxError> {
        panic!("drain exploded")
      }))?;
      Ok(())
    })
    .unwrap();
  container.start().unwrap();

  // Act
  let outcome = panic::catch_unwind(AssertUnwindSafe(|| container.stop()));

  // Assert
  assert!(outcome.is_err());
  assert_eq!(container.phase(), Phase::Stopped);
  assert_eq!(container.hook_states()[1].1, HookState::StopFailed);
}

#[test]
fn test_huge_timeouts_mean_no_deadline() {
  // Arrange
  let journal: Journal = Arc::default();
  let container = Container::builder()
    .start_timeout(Duration::MAX)
    .stop_timeout(Duration::MAX)
    .build()
    .unwrap();
  container
    .invoke(|hooks: Hooks| hooks.append(tracked_hook(&journal, "svc", false)))
    .unwrap();

  // Act
  container.start().unwrap();
  container.stop().unwrap();

  // Assert
  assert_eq!(entries(&journal), vec!["start(svc)", "stop(svc)"]);
}
