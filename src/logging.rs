use crate::LOG;

/// Logs every request with its response status and how long it took
#[derive(Debug, Default, Clone)]
pub struct LogMiddleware {
    _priv: (),
}

impl LogMiddleware {
    pub fn new() -> Self {
        Self { _priv: () }
    }
}

#[async_trait::async_trait]
impl<State: Clone + Send + Sync + 'static> tide::Middleware<State> for LogMiddleware {
    async fn handle(&self, req: tide::Request<State>, next: tide::Next<'_, State>) -> tide::Result {
        let path = req.url().path().to_owned();
        let method = req.method().to_string();
        let start = std::time::Instant::now();
        let res = next.run(req).await;
        let status = res.status();
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        if let Some(err) = res.error() {
            slog::error!(
                LOG, "request error";
                "method" => &method,
                "path" => &path,
                "status" => status as u16,
                "elapsed_ms" => elapsed_ms,
                "error" => ?err,
            );
        } else if status.is_server_error() {
            slog::error!(
                LOG, "request";
                "method" => &method,
                "path" => &path,
                "status" => status as u16,
                "elapsed_ms" => elapsed_ms,
            );
        } else {
            slog::info!(
                LOG, "request";
                "method" => &method,
                "path" => &path,
                "status" => status as u16,
                "elapsed_ms" => elapsed_ms,
            );
        }
        Ok(res)
    }
}
