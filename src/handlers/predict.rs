//! # One-Shot Prediction Handlers
//!
//! `POST /predict/file` and `POST /predict/stream`: upload a whole recording,
//! get back one detection per species.
//!
//! ## Request:
//! `multipart/form-data` with
//! - `file` (for `/predict/file`) or `data` (for `/predict/stream`): the audio
//! - `lat`, `lon`: required coordinates
//! - `date`: optional `YYYY-MM-DD`, defaults to today (UTC)
//! - `min_conf`: optional confidence floor, defaults to 0.25
//!
//! ## Headers:
//! `Authorization: Bearer <api key>`
//!
//! ## Response:
//! ```json
//! [
//!   {"scientific_name": "Turdus merula", "common_name": "Eurasian Blackbird",
//!    "label": "Turdus merula_Eurasian Blackbird", "confidence": 0.82,
//!    "start_time": 0.0, "end_time": 3.0}
//! ]
//! ```

use crate::detection::temp::TempAudioFile;
use crate::detection::{best_per_species, parse_recording_date, AnalysisParams, Detection};
use crate::error::{AppError, AppResult};
use crate::state::AppState;
use actix_multipart::{Field, Multipart};
use actix_web::{http::header, web, HttpRequest, HttpResponse};
use futures_util::stream::StreamExt;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

/// Longest accepted value for a plain text form field.
const MAX_TEXT_FIELD_BYTES: usize = 1024;

/// Which multipart field carries the audio, and how to name the temp file.
#[derive(Debug, Clone, Copy)]
enum UploadKind {
    /// Any container the engine can decode; keeps the client's file extension
    File,
    /// Raw WAV bytes
    Stream,
}

impl UploadKind {
    fn field_name(&self) -> &'static str {
        match self {
            UploadKind::File => "file",
            UploadKind::Stream => "data",
        }
    }

    fn temp_suffix(&self, filename: Option<&str>) -> String {
        match self {
            UploadKind::File => filename.and_then(safe_extension).unwrap_or_else(|| ".audio".to_string()),
            UploadKind::Stream => ".wav".to_string(),
        }
    }
}

/// Extension of a client-supplied filename, if it is short and plain.
fn safe_extension(filename: &str) -> Option<String> {
    let ext = Path::new(filename).extension()?.to_str()?;
    let plain = !ext.is_empty() && ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric());
    plain.then(|| format!(".{}", ext.to_ascii_lowercase()))
}

/// Everything read from the multipart body.
#[derive(Debug, Default)]
struct PredictForm {
    audio: Option<Vec<u8>>,
    filename: Option<String>,
    lat: Option<String>,
    lon: Option<String>,
    date: Option<String>,
    min_conf: Option<String>,
}

impl PredictForm {
    /// Validate the form fields into engine parameters.
    fn analysis_params(&self, default_min_conf: f64) -> AppResult<AnalysisParams> {
        let lat = parse_number("lat", self.lat.as_deref())?
            .ok_or_else(|| AppError::ValidationError("Missing form field 'lat'".to_string()))?;
        let lon = parse_number("lon", self.lon.as_deref())?
            .ok_or_else(|| AppError::ValidationError("Missing form field 'lon'".to_string()))?;
        let min_conf = parse_number("min_conf", self.min_conf.as_deref())?.unwrap_or(default_min_conf);

        if !(-90.0..=90.0).contains(&lat) {
            return Err(AppError::ValidationError("lat must be between -90 and 90".to_string()));
        }
        if !(-180.0..=180.0).contains(&lon) {
            return Err(AppError::ValidationError("lon must be between -180 and 180".to_string()));
        }
        if !(0.0..=1.0).contains(&min_conf) {
            return Err(AppError::ValidationError("min_conf must be between 0 and 1".to_string()));
        }

        let date = match self.date.as_deref().filter(|d| !d.trim().is_empty()) {
            Some(raw) => parse_recording_date(raw).ok_or_else(|| {
                AppError::ValidationError(format!("Invalid date '{}', expected YYYY-MM-DD", raw))
            })?,
            None => chrono::Utc::now().date_naive(),
        };

        Ok(AnalysisParams { lat, lon, date, min_conf })
    }
}

fn parse_number(name: &str, value: Option<&str>) -> AppResult<Option<f64>> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(Some)
            .ok_or_else(|| AppError::ValidationError(format!("Form field '{}' must be a number", name))),
    }
}

/// Check `Authorization: Bearer <key>` against the configured key.
fn authorize(req: &HttpRequest, expected: &str) -> AppResult<()> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .ok_or_else(|| AppError::Unauthorized("Missing bearer token".to_string()))?;

    if token != expected {
        return Err(AppError::Unauthorized("Invalid token".to_string()));
    }
    Ok(())
}

/// Take one request from the caller's budget. Keyed by peer IP, not by any
/// forwarded header, so clients cannot pick their own bucket.
fn check_rate_limit(req: &HttpRequest, state: &AppState) -> AppResult<()> {
    let client = req
        .peer_addr()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    state
        .rate_limiter
        .check(&client)
        .map_err(|e| AppError::RateLimited(e.to_string()))
}

async fn read_field(field: &mut Field, limit: usize, name: &str) -> AppResult<Vec<u8>> {
    let mut bytes = Vec::new();
    while let Some(chunk) = field.next().await {
        let chunk = chunk.map_err(|e| AppError::BadRequest(format!("Multipart error: {}", e)))?;
        if bytes.len() + chunk.len() > limit {
            return Err(AppError::PayloadTooLarge(format!(
                "Field '{}' exceeds the {} byte limit",
                name, limit
            )));
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}

async fn read_text(field: &mut Field, name: &str) -> AppResult<String> {
    let bytes = read_field(field, MAX_TEXT_FIELD_BYTES, name).await?;
    String::from_utf8(bytes).map_err(|_| AppError::ValidationError(format!("Form field '{}' is not UTF-8", name)))
}

/// Read the multipart body, keeping the audio field and the known text fields.
async fn read_form(mut payload: Multipart, kind: UploadKind, max_bytes: usize) -> AppResult<PredictForm> {
    let mut form = PredictForm::default();

    while let Some(item) = payload.next().await {
        let mut field = item.map_err(|e| AppError::BadRequest(format!("Multipart error: {}", e)))?;

        let content_disposition = field
            .content_disposition()
            .ok_or_else(|| AppError::BadRequest("Missing content disposition".to_string()))?;
        let name = content_disposition
            .get_name()
            .ok_or_else(|| AppError::BadRequest("Missing field name".to_string()))?
            .to_string();

        if name == kind.field_name() {
            form.filename = content_disposition.get_filename().map(str::to_string);
            form.audio = Some(read_field(&mut field, max_bytes, &name).await?);
            continue;
        }

        match name.as_str() {
            "lat" => form.lat = Some(read_text(&mut field, &name).await?),
            "lon" => form.lon = Some(read_text(&mut field, &name).await?),
            "date" => form.date = Some(read_text(&mut field, &name).await?),
            "min_conf" => form.min_conf = Some(read_text(&mut field, &name).await?),
            // Unknown fields are drained and ignored
            _ => {
                read_field(&mut field, max_bytes, &name).await?;
            }
        }
    }

    Ok(form)
}

async fn predict(
    req: HttpRequest,
    payload: Multipart,
    state: web::Data<AppState>,
    kind: UploadKind,
) -> AppResult<HttpResponse> {
    authorize(&req, &state.config.auth.api_key)?;
    check_rate_limit(&req, &state)?;

    let start_time = Instant::now();
    let form = read_form(payload, kind, state.config.upload.max_bytes).await?;
    let params = form.analysis_params(state.config.stream.default_min_confidence)?;

    let suffix = kind.temp_suffix(form.filename.as_deref());
    let audio = form.audio.ok_or_else(|| {
        AppError::ValidationError(format!("Missing form field '{}'", kind.field_name()))
    })?;
    debug!(bytes = audio.len(), suffix = %suffix, "Prediction upload received");

    let detector = state.detector.clone();
    let temp_dir = state.config.detector.temp_dir.clone();
    let raw = web::block(move || -> AppResult<Vec<Detection>> {
        // Removed when dropped at the end of this closure, on every path.
        let upload = TempAudioFile::from_bytes(&temp_dir, &suffix, &audio)
            .map_err(|e| AppError::Internal(format!("Failed to save uploaded file: {}", e)))?;
        detector
            .detect(upload.path(), &params)
            .map_err(|e| AppError::Internal(format!("Detection failed: {}", e)))
    })
    .await
    .map_err(|e| AppError::Internal(format!("Detection worker failed: {}", e)))??;

    let raw_count = raw.len();
    let detections = best_per_species(raw);
    info!(
        raw = raw_count,
        species = detections.len(),
        duration_ms = start_time.elapsed().as_millis() as u64,
        "Prediction completed"
    );

    Ok(HttpResponse::Ok().json(detections))
}

/// Upload an audio file and receive one detection per species.
///
/// ## Endpoint: `POST /predict/file`
pub async fn predict_file(
    req: HttpRequest,
    payload: Multipart,
    state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    predict(req, payload, state, UploadKind::File).await
}

/// Send raw WAV bytes and receive one detection per species.
///
/// ## Endpoint: `POST /predict/stream`
pub async fn predict_stream(
    req: HttpRequest,
    payload: Multipart,
    state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    predict(req, payload, state, UploadKind::Stream).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::detection::test_support::detection;
    use crate::state::test_support::{state_with, state_with_config, test_config};
    use actix_web::{http::StatusCode, test as actix_test, App};

    const BOUNDARY: &str = "----birdnet-test-boundary";

    /// Build a multipart body from text fields and one optional file part.
    fn multipart(fields: &[(&str, &str)], file: Option<(&str, &str, &[u8])>) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, value) in fields {
            body.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                    BOUNDARY, name, value
                )
                .as_bytes(),
            );
        }
        if let Some((name, filename, data)) = file {
            body.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                    BOUNDARY, name, filename
                )
                .as_bytes(),
            );
            body.extend_from_slice(data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    fn request(uri: &str, token: Option<&str>, body: Vec<u8>) -> actix_test::TestRequest {
        let mut req = actix_test::TestRequest::post()
            .uri(uri)
            .peer_addr("10.1.2.3:40000".parse().unwrap())
            .insert_header((
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            ))
            .set_payload(body);
        if let Some(token) = token {
            req = req.insert_header((header::AUTHORIZATION, format!("Bearer {}", token)));
        }
        req
    }

    fn valid_file_body() -> Vec<u8> {
        multipart(
            &[("lat", "35.4244"), ("lon", "-120.7463"), ("date", "2024-06-01")],
            Some(("file", "dawn chorus.MP3", b"ID3 fake audio".as_slice())),
        )
    }

    macro_rules! app {
        ($state:expr) => {
            actix_test::init_service(
                App::new()
                    .app_data(web::Data::new($state))
                    .route("/predict/file", web::post().to(predict_file))
                    .route("/predict/stream", web::post().to(predict_stream)),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn test_returns_best_detection_per_species() {
        let dir = tempfile::tempdir().unwrap();
        let raw = vec![detection("A", 0.9), detection("A", 0.4), detection("B", 0.6)];
        let app = app!(state_with(Ok(raw), dir.path()));

        let resp = actix_test::call_service(&app, request("/predict/file", Some("test-key"), valid_file_body()).to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body: Vec<Detection> = actix_test::read_body_json(resp).await;
        let summary: Vec<(&str, f64)> = body.iter().map(|d| (d.scientific_name.as_str(), d.confidence)).collect();
        assert_eq!(summary, vec![("A", 0.9), ("B", 0.6)]);

        // Upload removed after the engine ran
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[actix_web::test]
    async fn test_stream_endpoint_reads_data_field() {
        let dir = tempfile::tempdir().unwrap();
        let app = app!(state_with(Ok(vec![detection("C", 0.7)]), dir.path()));

        let body = multipart(&[("lat", "60.4"), ("lon", "22.3")], Some(("data", "blob", b"RIFF....WAVE".as_slice())));
        let resp = actix_test::call_service(&app, request("/predict/stream", Some("test-key"), body).to_request()).await;

        assert_eq!(resp.status(), StatusCode::OK);
        let body: Vec<Detection> = actix_test::read_body_json(resp).await;
        assert_eq!(body.len(), 1);
    }

    #[actix_web::test]
    async fn test_missing_or_wrong_token_is_unauthorized() {
        let dir = tempfile::tempdir().unwrap();
        let app = app!(state_with(Ok(vec![]), dir.path()));

        let resp = actix_test::call_service(&app, request("/predict/file", None, valid_file_body()).to_request()).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(resp.headers().get(header::WWW_AUTHENTICATE).unwrap(), "Bearer");

        let resp = actix_test::call_service(&app, request("/predict/file", Some("nope"), valid_file_body()).to_request()).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn test_validation_errors() {
        let dir = tempfile::tempdir().unwrap();
        let app = app!(state_with(Ok(vec![]), dir.path()));
        let audio = Some(("file", "a.wav", b"RIFF".as_slice()));

        let cases = [
            multipart(&[("lon", "0")], audio),
            multipart(&[("lat", "91"), ("lon", "0")], audio),
            multipart(&[("lat", "0"), ("lon", "west")], audio),
            multipart(&[("lat", "0"), ("lon", "0"), ("min_conf", "1.5")], audio),
            multipart(&[("lat", "0"), ("lon", "0"), ("date", "June 1st")], audio),
            multipart(&[("lat", "0"), ("lon", "0")], None),
        ];

        for body in cases {
            let resp = actix_test::call_service(&app, request("/predict/file", Some("test-key"), body).to_request()).await;
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        }
    }

    #[actix_web::test]
    async fn test_engine_failure_is_internal_error() {
        let dir = tempfile::tempdir().unwrap();
        let app = app!(state_with(Err("model crashed".to_string()), dir.path()));

        let resp = actix_test::call_service(&app, request("/predict/file", Some("test-key"), valid_file_body()).to_request()).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body: serde_json::Value = actix_test::read_body_json(resp).await;
        let message = body["error"]["message"].as_str().unwrap();
        assert!(message.contains("model crashed"));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[actix_web::test]
    async fn test_rate_limit_per_client() {
        let dir = tempfile::tempdir().unwrap();
        let mut config: AppConfig = test_config(dir.path());
        config.upload.requests_per_minute = 2;
        let app = app!(state_with_config(config, Ok(vec![])));

        for _ in 0..2 {
            let resp = actix_test::call_service(&app, request("/predict/file", Some("test-key"), valid_file_body()).to_request()).await;
            assert_eq!(resp.status(), StatusCode::OK);
        }
        let resp = actix_test::call_service(&app, request("/predict/file", Some("test-key"), valid_file_body()).to_request()).await;
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[actix_web::test]
    async fn test_oversized_upload_rejected_while_reading() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.upload.max_bytes = 64;
        let app = app!(state_with_config(config, Ok(vec![])));

        let body = multipart(&[("lat", "0"), ("lon", "0")], Some(("file", "big.wav", [0u8; 512].as_slice())));
        let resp = actix_test::call_service(&app, request("/predict/file", Some("test-key"), body).to_request()).await;
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn test_temp_suffix() {
        assert_eq!(UploadKind::File.temp_suffix(Some("dawn chorus.MP3")), ".mp3");
        assert_eq!(UploadKind::File.temp_suffix(Some("../../etc/passwd")), ".audio");
        assert_eq!(UploadKind::File.temp_suffix(Some("x.we ird")), ".audio");
        assert_eq!(UploadKind::File.temp_suffix(None), ".audio");
        assert_eq!(UploadKind::Stream.temp_suffix(Some("clip.mp3")), ".wav");
    }
}
