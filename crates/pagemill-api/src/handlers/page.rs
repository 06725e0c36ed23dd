//! The page-assembly entry point: detect, resolve, render, respond, then
//! schedule the cache write and the visit log off the request path.

use crate::errors::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use pagemill_pool::TITLE_FALLBACK;
use pagemill_render::PageData;
use pagemill_types::{AlertLevel, PagemillError, VisitRecord};
use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Instant;
use tracing::{debug, warn};

const PLACEHOLDER_BODY: &str = "<!DOCTYPE html><html><head></head><body></body></html>";

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub ua: Option<String>,
    pub domain: Option<String>,
    pub path: Option<String>,
}

pub async fn page(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Response> {
    let started = Instant::now();

    let user_agent = query.ua.unwrap_or_default();
    let domain = query
        .domain
        .filter(|d| !d.is_empty())
        .ok_or_else(|| PagemillError::invalid_param("domain is required"))?
        .to_lowercase();
    let path = query.path.unwrap_or_else(|| "/".to_string());
    let peer_ip = connect_info.map(|ConnectInfo(addr)| addr.ip());

    // Stage 1: spider classification.
    let verdict = state.detector.detect(&user_agent, peer_ip).await;
    let detect_us = started.elapsed().as_micros() as u64;

    if !verdict.is_spider {
        debug!(domain = %domain, "Non-spider request");
        let return_404 = state.settings.read().await.return_404_for_non_spider;
        let response = if return_404 {
            StatusCode::NOT_FOUND.into_response()
        } else {
            (
                [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
                PLACEHOLDER_BODY,
            )
                .into_response()
        };
        return Ok(response);
    }
    let spider_type = verdict.spider_name().to_string();

    // Stage 2: site resolution.
    let site_started = Instant::now();
    let site = state
        .site_cache
        .get(&domain)
        .await
        .map_err(ApiError::from)?;
    let site_us = site_started.elapsed().as_micros() as u64;

    let Some(site) = site.filter(|s| s.is_enabled()) else {
        record_visit(&state, &domain, &path, &spider_type, &user_agent, 403, started);
        return Ok((
            StatusCode::FORBIDDEN,
            axum::Json(serde_json::json!({"error": "Domain not registered"})),
        )
            .into_response());
    };

    // Stage 3+4: render context from the pools.
    let render_started = Instant::now();
    let title = state
        .consumables
        .title
        .try_pop()
        .unwrap_or_else(|| TITLE_FALLBACK.to_string());
    let body = match state.consumables.content.try_pop() {
        Some(body) => body,
        None => {
            state.alerts.raise(
                AlertLevel::Warning,
                "pool",
                "content pool empty during page assembly",
            );
            String::new()
        }
    };

    let data = PageData {
        title,
        article_content: body,
        domain: site.domain.clone(),
        path: path.clone(),
        keyword_group_id: site.keyword_group_id,
        image_group_id: site.image_group_id,
        analytics: site.analytics.clone(),
    };

    let html = match state.engine.render_page(&site, &data).await {
        Ok(html) => html,
        Err(e) => {
            record_visit(&state, &domain, &path, &spider_type, &user_agent, 500, started);
            return Err(ApiError::from(e));
        }
    };
    let render_us = render_started.elapsed().as_micros() as u64;

    // Stage 5: respond; cache write and visit log must not delay it.
    let total_us = started.elapsed().as_micros() as u64;
    state.timings.record(detect_us, site_us, render_us, total_us);

    {
        let html_cache = state.html_cache.clone();
        let (cache_domain, cache_path, cache_html) = (domain.clone(), path.clone(), html.clone());
        tokio::spawn(async move {
            if let Err(e) = html_cache.set(&cache_domain, &cache_path, &cache_html).await {
                warn!(domain = %cache_domain, error = %e, "HTML cache write failed");
            }
        });
    }
    record_visit(&state, &domain, &path, &spider_type, &user_agent, 200, started);

    Ok((
        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
        html,
    )
        .into_response())
}

fn record_visit(
    state: &AppState,
    domain: &str,
    path: &str,
    spider_type: &str,
    user_agent: &str,
    status: u16,
    started: Instant,
) {
    state.logger.record(VisitRecord {
        domain: domain.to_string(),
        path: path.to_string(),
        spider_type: spider_type.to_string(),
        status,
        resp_time_ms: started.elapsed().as_millis() as u64,
        user_agent: user_agent.chars().take(500).collect(),
        remote_ip: None,
        created_at: Utc::now(),
    });
}
