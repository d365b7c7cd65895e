//! Run a two-stage pipeline built from a JSON config: a greeter stage produces a
//! message every second and a printer stage prints it.

use std::sync::Arc;
use std::time::Duration;

use streamweave_pipeline::{
  BoxError, Component, Config, FactoryTemplate, FnProcessor, Instance, Pipeline, Port, Record,
  Registry,
};

const CONFIG: &str = r#"{
  "name": "greetings",
  "components": [{ "greeting": "hello" }],
  "processors": [{ "greeter": "" }, { "printer": "" }],
  "pipeline": {
    "schedule": "* * * * * *",
    "stream": { "name": "greeter", "childs": [{ "name": "printer" }] }
  }
}"#;

struct Greeting(String);

impl Component for Greeting {
  fn instance(&self) -> Instance {
    Instance::new("greeting", self.0.clone())
  }
}

fn registry() -> Result<Registry, BoxError> {
  let mut registry = Registry::new();
  registry.register_component(
    "greeting",
    FactoryTemplate::new("hello", "the word to greet with", |raw: &str| {
      Ok(Arc::new(Greeting(raw.to_string())) as Arc<dyn Component>)
    }),
  )?;

  let greeter = FnProcessor::new(|r: Record| async move {
    let greeting = r.get::<String>("greeting").unwrap_or_default();
    Ok::<_, BoxError>(Record::new().with("msg", format!("{greeting}, world")))
  })
  .input(Port::named::<String>("greeting"))
  .output(Port::new::<String>("msg", "Message"))
  .into_arc();
  registry.register_processor(
    "greeter",
    FactoryTemplate::with_processor("builds a message", greeter),
  )?;

  let printer = FnProcessor::new(|r: Record| async move {
    if let Some(msg) = r.get::<String>("msg") {
      println!("{msg}");
    }
    Ok::<_, BoxError>(Record::new())
  })
  .input(Port::new::<String>("msg", "Message"))
  .into_arc();
  registry.register_processor(
    "printer",
    FactoryTemplate::with_processor("prints messages", printer),
  )?;
  Ok(registry)
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
  tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
    .init();

  let registry = registry()?;
  let pipeline = Pipeline::from_config(Config::from_json_str(CONFIG)?, &registry)?;
  pipeline.start().await?;
  tokio::time::sleep(Duration::from_secs(3)).await;
  pipeline.stop().await;

  println!("{}", pipeline.monitor());
  println!("{}", pipeline.monitor().with("printer"));
  Ok(())
}
