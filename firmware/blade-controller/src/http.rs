use crate::channel::ControlChannel;
use crate::error::ControlResult;
use esp_idf_svc::http::server::{Configuration, EspHttpServer};
use esp_idf_svc::http::Method;
use esp_idf_svc::io::{EspIOError, Write};
use log::{info, warn};
use minicbor::to_vec;
use std::sync::Arc;

pub const HTTP_PORT: u16 = 80;

const PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>Servo Blade Control</title></head>
<body>
<h1>Servo Blade Control</h1>

<h3>Manual Spin</h3>
<form>
<input type="submit" name="spin_forward" value="Spin Forward">
<input type="submit" name="spin_reverse" value="Spin Reverse">
<input type="submit" name="stop_spin" value="Stop">
</form>

<h3>Calibration</h3>
<form>
<input type="submit" name="calibrate" value="Calibrate Startpoint">
</form>

<h3>Loop Mode</h3>
<form>
Press/release retract (degrees): <input type="number" name="retract" value="15"><br>
Speed (ms per step): <input type="number" name="speed" value="50"><br>
Random delay min (ms): <input type="number" name="min_delay" value="1000"><br>
Random delay max (ms): <input type="number" name="max_delay" value="5000"><br>
<input type="submit" name="start_loop" value="Start Loop">
<input type="submit" name="stop_loop" value="Stop Loop">
</form>

<p>{status}</p>
</body>
</html>
"#;

fn render_page(status: &str) -> String {
    PAGE.replace("{status}", status)
}

/// Start the HTTP control server. Keep the returned server alive.
///
/// `GET /?<command>&<params>` runs the command and renders the control
/// page with the resulting status; `GET /status` returns the CBOR
/// [`blade_protocol::StatusReport`].
pub fn start_server(channel: Arc<ControlChannel>) -> ControlResult<EspHttpServer<'static>> {
    let mut server = EspHttpServer::new(&Configuration {
        http_port: HTTP_PORT,
        ..Default::default()
    })?;

    let page_channel = Arc::clone(&channel);
    server.fn_handler("/", Method::Get, move |req| {
        let query = req.uri().split_once('?').map(|(_, q)| q.to_string());
        let status = query
            .as_deref()
            .and_then(|q| page_channel.submit_query(q))
            .unwrap_or_else(|| page_channel.status());
        let mut resp = req.into_response(200, None, &[("Content-Type", "text/html")])?;
        resp.write_all(render_page(&status).as_bytes())?;
        Ok::<(), EspIOError>(())
    })?;

    server.fn_handler("/status", Method::Get, move |req| {
        match to_vec(&channel.report()) {
            Ok(body) => {
                let mut resp =
                    req.into_response(200, None, &[("Content-Type", "application/cbor")])?;
                resp.write_all(&body)?;
            }
            Err(e) => {
                warn!("Status encode failed: {}", e);
                req.into_status_response(500)?;
            }
        }
        Ok::<(), EspIOError>(())
    })?;

    info!("HTTP control server listening on port {}", HTTP_PORT);
    Ok(server)
}
