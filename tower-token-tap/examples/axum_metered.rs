use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::error_handling::HandleErrorLayer;
use axum::extract::Request;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use token_tap::BucketConfig;
use token_tap::TokenBucket;
use tower::BoxError;
use tower::ServiceBuilder;
use tower_token_tap::ManagedRateLimitLayer;
use tower_token_tap::ShotError;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    // 10 tokens, refilled 10 at a time every second
    let config = BucketConfig::new(10, 10, Duration::from_secs(1))?;
    let bucket = Arc::new(TokenBucket::new(config));

    // Reports cost 5 tokens each, everything else 1
    let cheap = ManagedRateLimitLayer::<_, Request>::new(bucket.clone(), Duration::from_millis(500));
    let expensive = cheap.clone().with_cost(5);

    let app = Router::new()
        .route("/", get(|| async { "Hello, Tap!" }))
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_shot_error))
                .layer(cheap)
                // Converts the Route's Infallible into BoxError for the managed layer
                .map_err(BoxError::from),
        )
        .merge(
            Router::new()
                .route("/report", get(|| async { "A very expensive report" }))
                .layer(
                    ServiceBuilder::new()
                        .layer(HandleErrorLayer::new(handle_shot_error))
                        .layer(expensive)
                        .map_err(BoxError::from),
                ),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await?;
    println!("Listening on http://127.0.0.1:3000");

    axum::serve(listener, app).await?;
    Ok(())
}

/// The signature must match BoxError -> IntoResponse
async fn handle_shot_error(err: BoxError) -> impl IntoResponse {
    if let Some(shot_err) = err.downcast_ref::<ShotError>() {
        shot_err.clone().into_response()
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal Service Error").into_response()
    }
}
