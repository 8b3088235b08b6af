//! 매개변수 그리드 탐색.
//!
//! `buy_xd × stop_loss_n × stop_win_n` 조합을 이 중첩 순서대로 생성해 `max_runs`개까지
//! 백테스트하고, 주문 수와 행동 수 내림차순으로 안정 정렬합니다.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::backtest::{BacktestConfig, BacktestEngine, BacktestInput, BuyFactor, SellFactor};

/// 실행 횟수 상한.
pub const MAX_GRID_RUNS: usize = 200;

/// 그리드 정의.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    #[serde(default = "default_buy_xd_list")]
    pub buy_xd_list: Vec<usize>,
    #[serde(default = "default_stop_loss_n_list")]
    pub stop_loss_n_list: Vec<f64>,
    #[serde(default = "default_stop_win_n_list")]
    pub stop_win_n_list: Vec<f64>,
    #[serde(default = "default_max_runs")]
    pub max_runs: usize,
}

fn default_buy_xd_list() -> Vec<usize> {
    vec![20, 42, 60]
}
fn default_stop_loss_n_list() -> Vec<f64> {
    vec![0.5, 1.0]
}
fn default_stop_win_n_list() -> Vec<f64> {
    vec![2.0, 3.0]
}
fn default_max_runs() -> usize {
    30
}

impl Default for GridSpec {
    fn default() -> Self {
        Self {
            buy_xd_list: default_buy_xd_list(),
            stop_loss_n_list: default_stop_loss_n_list(),
            stop_win_n_list: default_stop_win_n_list(),
            max_runs: default_max_runs(),
        }
    }
}

impl GridSpec {
    /// 실행 횟수를 `[1, 200]`으로 제한해 설정합니다.
    pub fn with_max_runs(mut self, max_runs: i64) -> Self {
        self.max_runs = max_runs.clamp(1, MAX_GRID_RUNS as i64) as usize;
        self
    }

    /// 중첩 순서대로 생성한 조합. `max_runs`개를 넘지 않습니다.
    pub fn combinations(&self) -> Vec<GridPoint> {
        let mut points = Vec::new();
        for &buy_xd in &self.buy_xd_list {
            for &stop_loss_n in &self.stop_loss_n_list {
                for &stop_win_n in &self.stop_win_n_list {
                    if points.len() >= self.max_runs {
                        return points;
                    }
                    points.push(GridPoint {
                        buy_xd,
                        stop_loss_n,
                        stop_win_n,
                    });
                }
            }
        }
        points
    }
}

/// 그리드 한 점.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridPoint {
    pub buy_xd: usize,
    pub stop_loss_n: f64,
    pub stop_win_n: f64,
}

/// 그리드 한 점의 실행 결과.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridRun {
    pub buy_xd: usize,
    pub stop_loss_n: f64,
    pub stop_win_n: f64,
    pub orders_rows: usize,
    pub actions_rows: usize,
    pub benchmark: String,
}

/// `(orders_rows, actions_rows)` 내림차순 안정 정렬.
pub fn rank_runs(runs: &mut [GridRun]) {
    runs.sort_by(|a, b| {
        b.orders_rows
            .cmp(&a.orders_rows)
            .then_with(|| b.actions_rows.cmp(&a.actions_rows))
    });
}

/// 모든 조합을 실행하고 순위를 매겨 반환합니다.
///
/// 설정 검증이나 실행이 실패한 조합, 결과가 없는 조합은 건너뜁니다.
pub fn run_grid(spec: &GridSpec, base: &BacktestConfig, input: &BacktestInput) -> Vec<GridRun> {
    let mut runs = Vec::new();
    for point in spec.combinations() {
        let mut config = base.clone();
        config.buy_factors = vec![BuyFactor::Breakout { xd: point.buy_xd }];
        config.sell_factors = vec![SellFactor::AtrNStop {
            stop_loss_n: point.stop_loss_n,
            stop_win_n: point.stop_win_n,
        }];

        let outcome = BacktestEngine::new(config).and_then(|engine| engine.run(input));
        match outcome {
            Ok(Some(outcome)) => runs.push(GridRun {
                buy_xd: point.buy_xd,
                stop_loss_n: point.stop_loss_n,
                stop_win_n: point.stop_win_n,
                orders_rows: outcome.orders.len(),
                actions_rows: outcome.actions.len(),
                benchmark: outcome.benchmark,
            }),
            Ok(None) => debug!(?point, "결과 없음, 조합 건너뜀"),
            Err(e) => warn!(?point, error = %e, "조합 실행 실패, 건너뜀"),
        }
    }
    rank_runs(&mut runs);
    runs
}
