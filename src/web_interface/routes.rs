use std::convert::Infallible;
use std::sync::Arc;

use log::{info, warn};
use warp::{http::StatusCode, reply, Filter, Rejection, Reply};

use super::types::{ApiError, ContainerEntry, RemovedResponse};
use crate::container_management::Director;
use crate::error_handling::types::DirectorError;

pub type Directors = Arc<Vec<Arc<Director>>>;

fn with_directors(directors: Directors) -> impl Filter<Extract = (Directors,), Error = Infallible> + Clone {
    warp::any().map(move || Arc::clone(&directors))
}

fn api_error(message: String, status: StatusCode) -> warp::reply::Response {
    reply::with_status(reply::json(&ApiError { message }), status).into_response()
}

/// GET /
pub fn health_route() -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path::end().and(warp::get()).map(|| {
        reply::html(
            r#"<html><head><title>Miel</title></head>
                <body><h1>Miel is running</h1><p>See /containers for JSON.</p></body></html>"#,
        )
    })
}

/// GET /containers
pub fn list_containers_route(directors: Directors) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path("containers")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_directors(directors))
        .map(|directors: Directors| {
            let entries: Vec<ContainerEntry> = directors
                .iter()
                .flat_map(|director| {
                    director.list_containers().into_iter().map(|detail| ContainerEntry {
                        director: director.name().to_string(),
                        detail,
                    })
                })
                .collect();
            reply::json(&entries)
        })
}

/// DELETE /containers/:name
pub fn remove_container_route(directors: Directors) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("containers" / String)
        .and(warp::delete())
        .and(with_directors(directors))
        .and_then(|name: String, directors: Directors| async move {
            for director in directors.iter() {
                if director.get_container_by_name(&name).is_none() {
                    continue;
                }
                match director.remove_container(&name).await {
                    Ok(()) => {
                        info!("[web] removed container {}", name);
                        let body = RemovedResponse {
                            name,
                            director: director.name().to_string(),
                        };
                        return Ok::<_, Rejection>(
                            reply::with_status(reply::json(&body), StatusCode::OK).into_response(),
                        );
                    }
                    // Removed concurrently, keep looking.
                    Err(DirectorError::NotFound(_)) => continue,
                    Err(e) => {
                        warn!("[web] removing container {} failed: {}", name, e);
                        return Ok(api_error(e.to_string(), StatusCode::INTERNAL_SERVER_ERROR));
                    }
                }
            }
            Ok(api_error(format!("No container named {}", name), StatusCode::NOT_FOUND))
        })
}

/// Every route of the admin API.
pub fn routes(directors: Directors) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    health_route()
        .or(list_containers_route(Arc::clone(&directors)))
        .or(remove_container_route(directors))
}
