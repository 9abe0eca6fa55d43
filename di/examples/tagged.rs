use fibre_di::{instance, key, BoxError, Container, EventLog, Provider};
use std::sync::Arc;

// Two connection pools of the same type, told apart by tag.
struct Pool {
  url: String,
}

struct ReportService {
  reads: Arc<Pool>,
  writes: Arc<Pool>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
  let log = EventLog::new();
  let mut container = Container::builder().event_sink(log.clone()).build()?;

  // --- Tagged Registration ---
  container.supply_tagged("primary", String::from("postgres://primary"))?;
  container.supply_tagged("replica", String::from("postgres://replica"))?;

  for tag in ["primary", "replica"] {
    container.register(Provider::new(
      format!("{}_pool", tag),
      vec![key!(String, tag)],
      vec![key!(Pool, tag)],
      |args| {
        let url = args.get::<String>(0)?;
        println!("opening pool for {}", url);
        Ok::<_, fibre_di::Error>(vec![instance(Pool { url: (*url).clone() })])
      },
    ))?;
  }

  container.register(Provider::new(
    "report_service",
    vec![key!(Pool, "replica"), key!(Pool, "primary")],
    vec![key!(ReportService)],
    |args| {
      let service = ReportService {
        reads: args.get::<Pool>(0)?,
        writes: args.get::<Pool>(1)?,
      };
      Ok::<_, BoxError>(vec![instance(service)])
    },
  ))?;

  // --- Planning ---
  for provider in container.resolve_plan(&key!(ReportService))? {
    println!("plan: {}", provider.label());
  }

  // --- Resolution ---
  let reports = container.resolve::<ReportService>()?;
  println!("reads from {}, writes to {}", reports.reads.url, reports.writes.url);

  for event in log.events() {
    println!("#{:<3} {:<12} {}", event.seq, event.kind.to_string(), event.subject);
  }
  Ok(())
}
