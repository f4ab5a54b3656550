use super::*;

pub(crate) fn run(settings: Settings) -> SubcommandResult {
  let runtime = tokio::runtime::Builder::new_multi_thread()
    .enable_all()
    .build()?;

  runtime.block_on(async {
    let storage = Arc::new(Storage::open(&settings.data_dir())?);
    let client = Arc::new(HttpClient::new(
      &settings.node_rpc_url(),
      settings.request_timeout(),
    )?);
    let events = Arc::new(EventBus::new());
    let filters = Arc::new(FilterRegistry::new());
    let subscriptions = Arc::new(SubscriptionRegistry::new());

    let cancel = SHUTDOWN.clone();

    let pump = tokio::spawn(server::run_event_pump(
      events.subscribe(&[EventKind::NewBlock]),
      filters.clone(),
      subscriptions.clone(),
      cancel.clone(),
    ));

    let cleanup = tokio::spawn(filters::cleanup_task(
      filters.clone(),
      settings.filter_ttl(),
      cancel.clone(),
    ));

    let server = Arc::new(server::Server {
      storage: storage.clone(),
      filters: filters.clone(),
      subscriptions: subscriptions.clone(),
    });

    let serving = tokio::spawn({
      let cancel = cancel.clone();
      let address = settings.listen_address();
      async move { server.serve(address, cancel).await }
    });

    let fetcher = Fetcher::new(client, storage, events.clone(), settings.fetcher_config());
    let result = fetcher.run(cancel.clone()).await;

    // wind down whatever outlived the pipeline, in either direction
    cancel.cancel();
    events.close();
    pump.await.ok();
    cleanup.await.ok();
    let serving = serving.await;

    result?;

    if let Ok(Err(err)) = serving {
      return Err(err);
    }

    Ok(None)
  })
}
