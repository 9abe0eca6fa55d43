use fibre_di::{BoxError, Container, Hook, Hooks};
use std::sync::Arc;
use std::time::Duration;

// The root of the graph: plain configuration, supplied as a value.
struct Config {
  database_url: String,
  listen_addr: String,
}

// Opened on start, closed on stop.
struct Database {
  url: String,
}

// Depends on the database, so it starts after it and stops before it.
struct HttpServer {
  db: Arc<Database>,
  addr: String,
}

fn new_database(config: Arc<Config>, hooks: Hooks) -> Result<Database, BoxError> {
  let url = config.database_url.clone();
  let (open_url, close_url) = (url.clone(), url.clone());
  hooks.append(
    Hook::new()
      .on_start(move |_| {
        println!("database: connecting to {}", open_url);
        Ok::<(), BoxError>(())
      })
      .on_stop(move |_| {
        println!("database: closing {}", close_url);
        Ok::<(), BoxError>(())
      }),
  )?;
  Ok(Database { url })
}

fn new_server(
  config: Arc<Config>,
  db: Arc<Database>,
  hooks: Hooks,
) -> Result<HttpServer, BoxError> {
  let addr = config.listen_addr.clone();
  let (listen_addr, close_addr) = (addr.clone(), addr.clone());
  hooks.append(
    Hook::new()
      .on_start(move |ctx| {
        println!(
          "server: listening on {} (deadline in {:?})",
          listen_addr,
          ctx.remaining()
        );
        Ok::<(), BoxError>(())
      })
      .on_stop(move |_| {
        println!("server: draining {}", close_addr);
        Ok::<(), BoxError>(())
      }),
  )?;
  Ok(HttpServer { db, addr })
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
  let mut container = Container::builder()
    .start_timeout(Duration::from_secs(10))
    .stop_timeout(Duration::from_secs(5))
    .build()?;

  // --- Registration ---
  container.supply(Config {
    database_url: "postgres://localhost/app".into(),
    listen_addr: "127.0.0.1:8080".into(),
  })?;
  container.provide(new_server)?;
  container.provide(new_database)?;

  // --- Resolution ---
  // Registration order does not matter; the graph decides construction order.
  container.invoke(|server: Arc<HttpServer>| {
    println!("wired server {} -> {}", server.addr, server.db.url);
    Ok::<_, BoxError>(())
  })?;

  // --- Lifecycle ---
  container.start()?;
  println!("phase: {}", container.phase());
  container.stop()?;
  println!("phase: {}", container.phase());

  Ok(())
}
