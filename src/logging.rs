use crate::LOG;

/// Request logging for tide through the app's slog logger
#[derive(Debug, Default, Clone)]
pub struct LogMiddleware;

impl LogMiddleware {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl<State: Clone + Send + Sync + 'static> tide::Middleware<State> for LogMiddleware {
    async fn handle(&self, req: tide::Request<State>, next: tide::Next<'_, State>) -> tide::Result {
        let path = req.url().path().to_string();
        let method = req.method().to_string();
        let start = std::time::Instant::now();
        let res = next.run(req).await;
        let status = u16::from(res.status());
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        if let Some(err) = res.error() {
            slog::error!(
                LOG, "request failed";
                "method" => &method,
                "path" => &path,
                "status" => status,
                "elapsed_ms" => elapsed_ms,
                "error" => %err,
            );
        } else if status >= 500 {
            slog::error!(
                LOG, "request";
                "method" => &method,
                "path" => &path,
                "status" => status,
                "elapsed_ms" => elapsed_ms,
            );
        } else {
            slog::info!(
                LOG, "request";
                "method" => &method,
                "path" => &path,
                "status" => status,
                "elapsed_ms" => elapsed_ms,
            );
        }
        Ok(res)
    }
}
