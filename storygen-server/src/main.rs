use std::env;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use actix_cors::Cors;
use actix_web::{App, HttpResponse, HttpServer, Responder, get, middleware, post, web};
use futures_channel::mpsc;
use log::{error, info, warn};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use storygen_core::model::generation_input::GenerationInput;
use storygen_core::model::generator::{Fragment, StoryStream, generate};
use storygen_core::model::trigram::TrigramModel;
use storygen_core::tokenizer::bpe::BpeTokenizer;
use storygen_core::tokenizer::special::SpecialTokens;

/// Pause between streamed fragments, so the client reads a steady
/// trickle instead of one burst.
const STREAM_PACING: Duration = Duration::from_millis(40);

/// Loaded artifacts, shared read-only across all requests.
///
/// No lock is needed: nothing writes after load, and every request
/// owns its own generation state and random source.
struct Engine {
	tokenizer: BpeTokenizer,
	model: TrigramModel,
	specials: SpecialTokens,
}

struct AppState {
	engine: Option<Engine>,
}

/// Body of the `/v1/generate` endpoints.
#[derive(Deserialize)]
struct GenerateRequest {
	prefix: String,
	max_length: Option<usize>,
}

#[derive(Serialize)]
struct GenerateResponse {
	generated_text: String,
}

#[derive(Serialize)]
struct HealthResponse {
	status: &'static str,
	model_loaded: bool,
}

impl GenerateRequest {
	/// Validates the requested length into [1, 1000], defaulting to 600.
	fn validated_max_length(&self) -> Result<usize, String> {
		match self.max_length {
			None => Ok(600),
			Some(n) if (1..=1000).contains(&n) => Ok(n),
			Some(n) => Err(format!("max_length must be within [1, 1000], got {n}")),
		}
	}
}

#[get("/health")]
async fn health(data: web::Data<AppState>) -> impl Responder {
	HttpResponse::Ok().json(HealthResponse {
		status: "ok",
		model_loaded: data.engine.is_some(),
	})
}

/// HTTP POST endpoint `/v1/generate`
///
/// Generates a whole story and returns the prefix concatenated with
/// the generated text. Generation runs on a blocking worker so the
/// executor stays responsive.
#[post("/v1/generate")]
async fn generate_story(
	data: web::Data<AppState>,
	request: web::Json<GenerateRequest>,
) -> impl Responder {
	if data.engine.is_none() {
		return HttpResponse::ServiceUnavailable().body("Model not loaded");
	}
	let max_length = match request.validated_max_length() {
		Ok(n) => n,
		Err(e) => return HttpResponse::BadRequest().body(e),
	};

	let prefix = request.prefix.clone();
	let state = data.clone();
	let result = web::block(move || -> Result<String, String> {
		let engine = state.engine.as_ref().ok_or("Model not loaded")?;

		let mut input = GenerationInput::new(engine.specials);
		input.set_max_length(max_length);

		let prefix_ids = engine.tokenizer.encode(&prefix);
		generate(
			&engine.model,
			&engine.tokenizer,
			&prefix_ids,
			input,
			StdRng::from_os_rng(),
		)
		.map_err(|e| e.to_string())
	})
	.await;

	match result {
		Ok(Ok(text)) => HttpResponse::Ok().json(GenerateResponse {
			generated_text: format!("{} {}", request.prefix, text),
		}),
		Ok(Err(e)) => HttpResponse::InternalServerError().body(e),
		Err(_) => HttpResponse::InternalServerError().body("Generation task failed"),
	}
}

/// HTTP POST endpoint `/v1/generate-stream`
///
/// Streams decoded text fragments as they are generated; paragraph
/// breaks arrive as literal blank lines. A blocking worker drives the
/// token stream and feeds a channel the response body drains.
#[post("/v1/generate-stream")]
async fn generate_story_stream(
	data: web::Data<AppState>,
	request: web::Json<GenerateRequest>,
) -> impl Responder {
	if data.engine.is_none() {
		return HttpResponse::ServiceUnavailable().body("Model not loaded");
	}
	let max_length = match request.validated_max_length() {
		Ok(n) => n,
		Err(e) => return HttpResponse::BadRequest().body(e),
	};

	let prefix = request.prefix.clone();
	let state = data.clone();
	let (tx, rx) = mpsc::unbounded::<Result<web::Bytes, actix_web::Error>>();

	actix_web::rt::task::spawn_blocking(move || {
		let Some(engine) = state.engine.as_ref() else {
			return;
		};

		let mut input = GenerationInput::new(engine.specials);
		input.set_max_length(max_length);

		let prefix_ids = engine.tokenizer.encode(&prefix);
		let stream = StoryStream::new(
			&engine.model,
			&engine.tokenizer,
			&prefix_ids,
			input,
			StdRng::from_os_rng(),
		);

		for fragment in stream {
			let chunk = match fragment {
				Ok(Fragment::Token(id)) => engine.tokenizer.decode(&[id]),
				Ok(Fragment::ParagraphBreak) => "\n\n".to_owned(),
				Err(e) => {
					warn!("generation aborted: {e}");
					break;
				}
			};
			if tx.unbounded_send(Ok(web::Bytes::from(chunk))).is_err() {
				// Client went away; dropping at a yield boundary is safe.
				break;
			}
			thread::sleep(STREAM_PACING);
		}
	});

	HttpResponse::Ok()
		.content_type("text/plain; charset=utf-8")
		.streaming(rx)
}

/// Loads both artifacts from the data directory.
///
/// # Errors
/// Fails fast on a missing, truncated, foreign or malformed artifact,
/// or on a tokenizer saved without its reserved markers.
fn load_engine(dir: &Path) -> Result<Engine, Box<dyn std::error::Error>> {
	let tokenizer = BpeTokenizer::load(dir.join("tokenizer.tok"))?;
	let model = TrigramModel::load(dir.join("model.lm"))?;
	let specials = tokenizer
		.specials()
		.ok_or("Tokenizer artifact has no reserved markers")?;
	Ok(Engine { tokenizer, model, specials })
}

/// Main entry point for the server.
///
/// Loads the artifacts once, shares them read-only with every worker
/// and starts an Actix-web HTTP server. A failed load keeps the
/// server up with `model_loaded: false` so `/health` stays useful.
///
/// # Notes
/// - `STORYGEN_DATA_DIR` overrides the artifact directory (default `./data`).
/// - `STORYGEN_BIND` overrides the bind address (default 127.0.0.1:8000).
#[actix_web::main]
async fn main() -> std::io::Result<()> {
	env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

	let data_dir = PathBuf::from(
		env::var("STORYGEN_DATA_DIR").unwrap_or_else(|_| "./data".to_owned()),
	);
	let bind = env::var("STORYGEN_BIND").unwrap_or_else(|_| "127.0.0.1:8000".to_owned());

	let engine = match load_engine(&data_dir) {
		Ok(engine) => {
			info!("artifacts loaded from {}", data_dir.display());
			Some(engine)
		}
		Err(e) => {
			error!("failed to load artifacts from {}: {e}", data_dir.display());
			None
		}
	};
	let state = web::Data::new(AppState { engine });

	info!("listening on {bind}");
	HttpServer::new(move || {
		App::new()
			.wrap(middleware::Logger::default())
			.wrap(Cors::permissive())
			.app_data(state.clone())
			.service(health)
			.service(generate_story)
			.service(generate_story_stream)
	})
	.bind(bind)?
	.run()
	.await
}
