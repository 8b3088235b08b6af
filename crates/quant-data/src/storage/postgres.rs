//! PostgreSQL 저장소.
//!
//! 일봉은 UNNEST 배치 삽입 + `ON CONFLICT DO UPDATE`로 upsert하고,
//! `RETURNING (xmax = 0)`으로 삽입과 갱신을 구분합니다.

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::postgres::PgPool;
use sqlx::FromRow;
use tracing::{debug, info, instrument};

use super::{
    dedup_rows, dedup_symbols, KlineStore, SymbolPage, SymbolQuery, SymbolRecord, SymbolStore,
    UpsertStats,
};
use crate::error::Result;
use crate::kline::{backfill, KlineRow};

/// 한 번의 INSERT에 넣을 최대 행 수.
const UPSERT_CHUNK: usize = 500;

/// 종목 종류 판정 SQL (지수 여부).
const INDEX_PREDICATE: &str = "(symbol ILIKE 'sh000%' OR symbol ILIKE 'sz399%' \
     OR COALESCE(name, '') LIKE '%指数%' OR COALESCE(industry, '') LIKE '%指数%')";

/// 마이그레이션을 실행합니다.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("../../migrations").run(pool).await?;
    info!("데이터베이스 마이그레이션 완료");
    Ok(())
}

/// 일봉 데이터베이스 레코드.
#[derive(Debug, Clone, FromRow)]
struct KlineRecord {
    market: String,
    symbol: String,
    trade_date: NaiveDate,
    open: Option<f64>,
    close: Option<f64>,
    high: Option<f64>,
    low: Option<f64>,
    pre_close: Option<f64>,
    p_change: Option<f64>,
    volume: Option<i64>,
    date_week: Option<i32>,
    key: Option<i64>,
    atr14: Option<f64>,
    atr21: Option<f64>,
}

impl From<KlineRecord> for KlineRow {
    fn from(r: KlineRecord) -> Self {
        Self {
            market: r.market,
            symbol: r.symbol,
            trade_date: r.trade_date,
            open: r.open,
            close: r.close,
            high: r.high,
            low: r.low,
            pre_close: r.pre_close,
            p_change: r.p_change,
            volume: r.volume,
            date_week: r.date_week,
            key: r.key,
            atr14: r.atr14,
            atr21: r.atr21,
        }
    }
}

/// PostgreSQL 일봉 저장소.
#[derive(Debug, Clone)]
pub struct PgKlineStore {
    pool: PgPool,
}

impl PgKlineStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KlineStore for PgKlineStore {
    #[instrument(skip(self, rows), fields(count = rows.len()))]
    async fn upsert(&self, rows: Vec<KlineRow>) -> Result<UpsertStats> {
        let rows = dedup_rows(rows);
        let mut stats = UpsertStats::default();
        if rows.is_empty() {
            return Ok(stats);
        }

        for chunk in rows.chunks(UPSERT_CHUNK) {
            let markets: Vec<&str> = chunk.iter().map(|r| r.market.as_str()).collect();
            let symbols: Vec<&str> = chunk.iter().map(|r| r.symbol.as_str()).collect();
            let dates: Vec<NaiveDate> = chunk.iter().map(|r| r.trade_date).collect();
            let opens: Vec<Option<f64>> = chunk.iter().map(|r| r.open).collect();
            let closes: Vec<Option<f64>> = chunk.iter().map(|r| r.close).collect();
            let highs: Vec<Option<f64>> = chunk.iter().map(|r| r.high).collect();
            let lows: Vec<Option<f64>> = chunk.iter().map(|r| r.low).collect();
            let pre_closes: Vec<Option<f64>> = chunk.iter().map(|r| r.pre_close).collect();
            let p_changes: Vec<Option<f64>> = chunk.iter().map(|r| r.p_change).collect();
            let volumes: Vec<Option<i64>> = chunk.iter().map(|r| r.volume).collect();
            let weeks: Vec<Option<i32>> = chunk.iter().map(|r| r.date_week).collect();
            let keys: Vec<Option<i64>> = chunk.iter().map(|r| r.key).collect();
            let atr14s: Vec<Option<f64>> = chunk.iter().map(|r| r.atr14).collect();
            let atr21s: Vec<Option<f64>> = chunk.iter().map(|r| r.atr21).collect();

            let inserted_flags: Vec<bool> = sqlx::query_scalar(
                r#"
                INSERT INTO stock_klines
                    (market, symbol, trade_date, open, close, high, low, pre_close, p_change,
                     volume, date_week, key, atr14, atr21)
                SELECT * FROM UNNEST(
                    $1::text[], $2::text[], $3::date[],
                    $4::float8[], $5::float8[], $6::float8[], $7::float8[],
                    $8::float8[], $9::float8[], $10::int8[], $11::int4[], $12::int8[],
                    $13::float8[], $14::float8[]
                )
                ON CONFLICT (market, symbol, trade_date) DO UPDATE SET
                    open = EXCLUDED.open,
                    close = EXCLUDED.close,
                    high = EXCLUDED.high,
                    low = EXCLUDED.low,
                    pre_close = EXCLUDED.pre_close,
                    p_change = EXCLUDED.p_change,
                    volume = EXCLUDED.volume,
                    date_week = EXCLUDED.date_week,
                    key = EXCLUDED.key,
                    atr14 = EXCLUDED.atr14,
                    atr21 = EXCLUDED.atr21,
                    updated_at = NOW()
                RETURNING (xmax = 0) AS inserted
                "#,
            )
            .bind(&markets)
            .bind(&symbols)
            .bind(&dates)
            .bind(&opens)
            .bind(&closes)
            .bind(&highs)
            .bind(&lows)
            .bind(&pre_closes)
            .bind(&p_changes)
            .bind(&volumes)
            .bind(&weeks)
            .bind(&keys)
            .bind(&atr14s)
            .bind(&atr21s)
            .fetch_all(&self.pool)
            .await?;

            let inserted = inserted_flags.iter().filter(|f| **f).count();
            stats.merge(UpsertStats {
                inserted,
                updated: inserted_flags.len() - inserted,
            });
        }

        debug!(
            inserted = stats.inserted,
            updated = stats.updated,
            "일봉 캐시 저장"
        );
        Ok(stats)
    }

    #[instrument(skip(self))]
    async fn load(
        &self,
        market: &str,
        symbol: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<KlineRow>> {
        let records: Vec<KlineRecord> = sqlx::query_as(
            r#"
            SELECT market, symbol, trade_date, open, close, high, low, pre_close, p_change,
                   volume, date_week, key, atr14, atr21
            FROM stock_klines
            WHERE market = $1 AND symbol = $2
              AND ($3::date IS NULL OR trade_date >= $3)
              AND ($4::date IS NULL OR trade_date <= $4)
            ORDER BY trade_date ASC
            "#,
        )
        .bind(market)
        .bind(symbol)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        let mut rows: Vec<KlineRow> = records.into_iter().map(KlineRow::from).collect();
        backfill(&mut rows);
        Ok(rows)
    }

    async fn coverage(&self, market: &str, symbol: &str) -> Result<Option<(NaiveDate, NaiveDate)>> {
        let bounds: (Option<NaiveDate>, Option<NaiveDate>) = sqlx::query_as(
            r#"
            SELECT MIN(trade_date), MAX(trade_date)
            FROM stock_klines
            WHERE market = $1 AND symbol = $2
            "#,
        )
        .bind(market)
        .bind(symbol)
        .fetch_one(&self.pool)
        .await?;

        Ok(match bounds {
            (Some(first), Some(last)) => Some((first, last)),
            _ => None,
        })
    }
}

/// 종목 데이터베이스 레코드.
#[derive(Debug, Clone, FromRow)]
struct SymbolRow {
    market: String,
    symbol: String,
    name: Option<String>,
    exchange: Option<String>,
    industry: Option<String>,
}

impl From<SymbolRow> for SymbolRecord {
    fn from(r: SymbolRow) -> Self {
        Self {
            market: r.market,
            symbol: r.symbol,
            name: r.name,
            exchange: r.exchange,
            industry: r.industry,
        }
    }
}

/// PostgreSQL 종목 저장소.
#[derive(Debug, Clone)]
pub struct PgSymbolStore {
    pool: PgPool,
}

impl PgSymbolStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SymbolStore for PgSymbolStore {
    #[instrument(skip(self, records), fields(count = records.len()))]
    async fn upsert_symbols(&self, records: Vec<SymbolRecord>) -> Result<UpsertStats> {
        let records = dedup_symbols(records);
        let mut stats = UpsertStats::default();

        for chunk in records.chunks(UPSERT_CHUNK) {
            let markets: Vec<&str> = chunk.iter().map(|r| r.market.as_str()).collect();
            let symbols: Vec<&str> = chunk.iter().map(|r| r.symbol.as_str()).collect();
            let names: Vec<Option<&str>> = chunk.iter().map(|r| r.name.as_deref()).collect();
            let exchanges: Vec<Option<&str>> = chunk.iter().map(|r| r.exchange.as_deref()).collect();
            let industries: Vec<Option<&str>> = chunk.iter().map(|r| r.industry.as_deref()).collect();

            let inserted_flags: Vec<bool> = sqlx::query_scalar(
                r#"
                INSERT INTO stock_symbols (market, symbol, name, exchange, industry)
                SELECT * FROM UNNEST($1::text[], $2::text[], $3::text[], $4::text[], $5::text[])
                ON CONFLICT (market, symbol) DO UPDATE SET
                    name = EXCLUDED.name,
                    exchange = EXCLUDED.exchange,
                    industry = EXCLUDED.industry,
                    updated_at = NOW()
                RETURNING (xmax = 0) AS inserted
                "#,
            )
            .bind(&markets)
            .bind(&symbols)
            .bind(&names)
            .bind(&exchanges)
            .bind(&industries)
            .fetch_all(&self.pool)
            .await?;

            let inserted = inserted_flags.iter().filter(|f| **f).count();
            stats.merge(UpsertStats {
                inserted,
                updated: inserted_flags.len() - inserted,
            });
        }

        info!(
            inserted = stats.inserted,
            updated = stats.updated,
            "종목 메타데이터 저장"
        );
        Ok(stats)
    }

    async fn has_any(&self, markets: &[String]) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM stock_symbols WHERE market = ANY($1))",
        )
        .bind(markets)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn list_by_markets(&self, markets: &[String]) -> Result<Vec<SymbolRecord>> {
        let rows: Vec<SymbolRow> = sqlx::query_as(
            r#"
            SELECT market, symbol, name, exchange, industry
            FROM stock_symbols
            WHERE market = ANY($1)
            ORDER BY market, symbol
            "#,
        )
        .bind(markets)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(SymbolRecord::from).collect())
    }

    async fn get(&self, market: Option<&str>, symbol: &str) -> Result<Option<SymbolRecord>> {
        let row: Option<SymbolRow> = sqlx::query_as(
            r#"
            SELECT market, symbol, name, exchange, industry
            FROM stock_symbols
            WHERE symbol = $1 AND ($2::text IS NULL OR market = $2)
            ORDER BY market
            LIMIT 1
            "#,
        )
        .bind(symbol)
        .bind(market)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(SymbolRecord::from))
    }

    #[instrument(skip(self))]
    async fn search(&self, query: &SymbolQuery) -> Result<SymbolPage> {
        let pattern = query
            .q
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(|q| format!("%{}%", q));
        let kind = query.kind.map(|k| k.as_str());

        let filter = format!(
            r#"
            WHERE (cardinality($1::text[]) = 0 OR market = ANY($1))
              AND ($2::text IS NULL OR symbol ILIKE $2 OR name ILIKE $2)
              AND ($3::text IS NULL OR ($3 = 'index') = {INDEX_PREDICATE})
            "#
        );

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM stock_symbols {filter}"))
            .bind(&query.markets)
            .bind(&pattern)
            .bind(kind)
            .fetch_one(&self.pool)
            .await?;

        let rows: Vec<SymbolRow> = sqlx::query_as(&format!(
            "SELECT market, symbol, name, exchange, industry FROM stock_symbols {filter} \
             ORDER BY market, symbol LIMIT $4 OFFSET $5"
        ))
        .bind(&query.markets)
        .bind(&pattern)
        .bind(kind)
        .bind(i64::from(query.page_size))
        .bind(query.offset() as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(SymbolPage {
            items: rows.into_iter().map(SymbolRecord::from).collect(),
            total: total.max(0) as u64,
        })
    }
}
