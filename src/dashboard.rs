//! Cash dashboard: POS status plus the open turno's cash summary.
//!
//! Every successful response is cached in SQLite. When the backend is
//! unreachable the last cached payload is served and flagged stale, with its
//! age, so the counter keeps a (clearly marked) picture of the drawer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{endpoints, ApiClient, ApiError};
use crate::data_helpers::{de_bool, de_f64, de_opt_string};
use crate::db::{self, DbState};
use crate::sales::{self, GoalProgress};
use crate::shifts::{self, CashSummary};

pub const CACHE_POS_STATUS: &str = "pos_status";
pub const CACHE_CASH_SUMMARY: &str = "caja_resumen";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PosStatus {
    #[serde(rename = "turno_abierto", alias = "caja_abierta", default, deserialize_with = "de_bool")]
    pub shift_open: bool,
    #[serde(rename = "usuario", alias = "cajero", default, deserialize_with = "de_opt_string")]
    pub user: Option<String>,
    #[serde(rename = "ventas_hoy", alias = "total_ventas_hoy", default, deserialize_with = "de_f64")]
    pub sales_today: f64,
    #[serde(
        rename = "cantidad_ventas_hoy",
        alias = "num_ventas_hoy",
        default,
        deserialize_with = "de_f64"
    )]
    pub sales_count_today: f64,
    #[serde(rename = "productos_stock_bajo", alias = "alertas_stock", default, deserialize_with = "de_f64")]
    pub low_stock_products: f64,
}

/// A payload and where it came from.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub payload: Value,
    pub fetched_at: String,
    pub stale: bool,
}

/// Cache a fresh payload, or fall back to the cached one on failure.
///
/// Authorization failures always propagate; a cached dashboard must not
/// hide an expired session.
pub fn resolve_with_cache(
    db: &DbState,
    cache_key: &str,
    result: Result<Value, ApiError>,
    now: DateTime<Utc>,
) -> Result<Fetched, ApiError> {
    match result {
        Ok(payload) => {
            let fetched_at = now.to_rfc3339();
            match db.conn.lock() {
                Ok(conn) => {
                    if let Err(e) = db::cache_put(&conn, cache_key, &payload, &fetched_at) {
                        warn!(cache_key, error = %e, "could not cache payload");
                    }
                }
                Err(e) => warn!(cache_key, error = %e, "db lock poisoned, payload not cached"),
            }
            Ok(Fetched {
                payload,
                fetched_at,
                stale: false,
            })
        }
        Err(e) if e.is_auth_failure() => Err(e),
        Err(e) => {
            let cached = db
                .conn
                .lock()
                .ok()
                .and_then(|conn| db::cache_get(&conn, cache_key));
            match cached {
                Some(c) => {
                    warn!(cache_key, error = %e, fetched_at = %c.fetched_at, "serving cached payload");
                    Ok(Fetched {
                        payload: c.payload,
                        fetched_at: c.fetched_at,
                        stale: true,
                    })
                }
                None => Err(e),
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardSnapshot {
    pub status: PosStatus,
    pub cash: CashSummary,
    pub expected_cash: f64,
    pub sales_today: f64,
    pub sales_count_today: f64,
    pub average_ticket: f64,
    pub goal: Option<GoalProgress>,
    /// True when any part came from the local cache.
    pub stale: bool,
    /// Oldest fetch time among the parts.
    pub fetched_at: String,
    /// Seconds since `fetched_at` when stale.
    pub age_secs: Option<i64>,
}

fn age_secs(fetched_at: &str, now: DateTime<Utc>) -> Option<i64> {
    DateTime::parse_from_rfc3339(fetched_at)
        .ok()
        .map(|t| (now - t.with_timezone(&Utc)).num_seconds().max(0))
}

pub fn build_snapshot(
    status: &Fetched,
    cash: &Fetched,
    daily_goal: Option<f64>,
    now: DateTime<Utc>,
) -> Result<DashboardSnapshot, String> {
    let pos_status: PosStatus = serde_json::from_value(
        status
            .payload
            .get("estado")
            .cloned()
            .unwrap_or_else(|| status.payload.clone()),
    )
    .map_err(|e| format!("Estado del POS inválido: {e}"))?;
    let summary = shifts::parse_cash_summary(&cash.payload)?;

    // pos_status is authoritative for today's totals; the cash summary only
    // covers the open turno.
    let sales_today = if pos_status.sales_today > 0.0 {
        pos_status.sales_today
    } else {
        summary.total_sales()
    };
    let count_today = if pos_status.sales_count_today > 0.0 {
        pos_status.sales_count_today
    } else {
        summary.sales_count
    };
    let average_ticket = if count_today > 0.0 {
        crate::money::round2(sales_today / count_today)
    } else {
        0.0
    };

    let stale = status.stale || cash.stale;
    let fetched_at = if status.fetched_at <= cash.fetched_at {
        status.fetched_at.clone()
    } else {
        cash.fetched_at.clone()
    };
    let age = if stale { age_secs(&fetched_at, now) } else { None };

    Ok(DashboardSnapshot {
        expected_cash: summary.expected_cash(),
        goal: daily_goal.and_then(|g| sales::goal_progress(sales_today, g)),
        status: pos_status,
        cash: summary,
        sales_today,
        sales_count_today: count_today,
        average_ticket,
        stale,
        fetched_at,
        age_secs: age,
    })
}

pub async fn fetch_snapshot(api: &ApiClient, db: &DbState) -> Result<DashboardSnapshot, ApiError> {
    let cash_query = [("accion", "resumen".to_string())];
    let (status, cash) = tokio::join!(
        api.get(endpoints::POS_STATUS, &[]),
        api.get(endpoints::CASH_MANAGEMENT, &cash_query)
    );
    let now = Utc::now();
    let status = resolve_with_cache(db, CACHE_POS_STATUS, status, now)?;
    let cash = resolve_with_cache(db, CACHE_CASH_SUMMARY, cash, now)?;
    let snapshot = build_snapshot(&status, &cash, sales::load_daily_goal(db), now)
        .map_err(ApiError::Invalid)?;
    debug!(stale = snapshot.stale, sales_today = snapshot.sales_today, "dashboard snapshot");
    Ok(snapshot)
}

/// Refresh the dashboard every `interval` until `shutdown` fires.
///
/// The first refresh happens immediately.
pub fn spawn_polling<F>(
    api: Arc<ApiClient>,
    db: Arc<DbState>,
    interval: Duration,
    shutdown: CancellationToken,
    mut on_update: F,
) -> JoinHandle<()>
where
    F: FnMut(Result<DashboardSnapshot, ApiError>) + Send + 'static,
{
    tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "dashboard polling started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("dashboard polling stopped");
                    return;
                }
                _ = ticker.tick() => {
                    let result = fetch_snapshot(&api, &db).await;
                    if let Err(e) = &result {
                        warn!(error = %e, "dashboard refresh failed");
                    }
                    on_update(result);
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_715_000_000 + secs, 0).single().expect("valid timestamp")
    }

    #[test]
    fn fresh_payload_is_cached() {
        let db = db::open_in_memory().expect("db");
        let payload = json!({ "turno_abierto": 1, "ventas_hoy": "15000" });
        let fetched = resolve_with_cache(&db, CACHE_POS_STATUS, Ok(payload.clone()), at(0))
            .expect("fresh");
        assert!(!fetched.stale);

        let conn = db.conn.lock().expect("lock");
        let cached = db::cache_get(&conn, CACHE_POS_STATUS).expect("cached");
        assert_eq!(cached.payload, payload);
    }

    #[test]
    fn failure_serves_stale_cache() {
        let db = db::open_in_memory().expect("db");
        let payload = json!({ "ventas_hoy": 500 });
        resolve_with_cache(&db, CACHE_POS_STATUS, Ok(payload.clone()), at(0)).expect("fresh");

        let fetched = resolve_with_cache(
            &db,
            CACHE_POS_STATUS,
            Err(ApiError::Connect("http://localhost".into())),
            at(90),
        )
        .expect("stale");
        assert!(fetched.stale);
        assert_eq!(fetched.payload, payload);
        assert_eq!(fetched.fetched_at, at(0).to_rfc3339());
    }

    #[test]
    fn failure_without_cache_propagates() {
        let db = db::open_in_memory().expect("db");
        let err = resolve_with_cache(
            &db,
            CACHE_CASH_SUMMARY,
            Err(ApiError::Timeout("http://localhost".into())),
            at(0),
        )
        .unwrap_err();
        assert!(err.is_unreachable());
    }

    #[test]
    fn auth_failure_ignores_cache() {
        let db = db::open_in_memory().expect("db");
        resolve_with_cache(&db, CACHE_POS_STATUS, Ok(json!({})), at(0)).expect("fresh");
        let err = resolve_with_cache(
            &db,
            CACHE_POS_STATUS,
            Err(ApiError::Unauthorized { status: 401 }),
            at(5),
        )
        .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized { status: 401 }));
    }

    #[tokio::test]
    async fn snapshot_surfaces_expired_session_over_cache() {
        let db = db::open_in_memory().expect("db");
        resolve_with_cache(&db, CACHE_POS_STATUS, Ok(json!({ "ventas_hoy": 1 })), at(0))
            .expect("fresh");
        resolve_with_cache(&db, CACHE_CASH_SUMMARY, Ok(json!({})), at(0)).expect("fresh");

        let base = crate::api::test_backend::serve(401, r#"{"success":false}"#);
        let api = ApiClient::new(&base, Duration::from_secs(5)).expect("client");
        let err = fetch_snapshot(&api, &db).await.expect_err("expired session");
        assert!(err.is_auth_failure());
    }

    #[test]
    fn snapshot_combines_parts_and_reports_age() {
        let status = Fetched {
            payload: json!({ "turno_abierto": "1", "usuario": "ana", "ventas_hoy": 60_000, "cantidad_ventas_hoy": 24 }),
            fetched_at: at(0).to_rfc3339(),
            stale: true,
        };
        let cash = Fetched {
            payload: json!({ "caja": { "turno_abierto": true, "monto_inicial": 10_000, "ventas_efectivo": 35_000, "egresos": 5_000 } }),
            fetched_at: at(60).to_rfc3339(),
            stale: false,
        };
        let snap = build_snapshot(&status, &cash, Some(100_000.0), at(300)).expect("snapshot");
        assert!(snap.status.shift_open);
        assert_eq!(snap.expected_cash, 40_000.0);
        assert_eq!(snap.sales_today, 60_000.0);
        assert_eq!(snap.average_ticket, 2_500.0);
        assert_eq!(snap.goal.as_ref().map(|g| g.percent), Some(60.0));
        assert!(snap.stale);
        assert_eq!(snap.age_secs, Some(300));
    }

    #[test]
    fn snapshot_falls_back_to_cash_totals() {
        let status = Fetched {
            payload: json!({ "turno_abierto": false }),
            fetched_at: at(0).to_rfc3339(),
            stale: false,
        };
        let cash = Fetched {
            payload: json!({ "ventas_efectivo": 3_000, "ventas_tarjeta": 1_000, "cantidad_ventas": 4 }),
            fetched_at: at(0).to_rfc3339(),
            stale: false,
        };
        let snap = build_snapshot(&status, &cash, None, at(10)).expect("snapshot");
        assert_eq!(snap.sales_today, 4_000.0);
        assert_eq!(snap.average_ticket, 1_000.0);
        assert!(snap.goal.is_none());
        assert_eq!(snap.age_secs, None);
    }

    #[tokio::test]
    async fn polling_stops_on_cancellation() {
        let api = Arc::new(
            ApiClient::new("http://127.0.0.1:9", Duration::from_millis(200)).expect("client"),
        );
        let db = Arc::new(db::open_in_memory().expect("db"));
        let shutdown = CancellationToken::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let handle = spawn_polling(api, db, Duration::from_secs(60), shutdown.clone(), move |r| {
            let _ = tx.send(r.is_ok());
        });

        // First tick fires immediately; the unreachable backend yields an error.
        let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("first refresh");
        assert_eq!(first, Some(false));

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("task stops")
            .expect("task joins");
    }
}
