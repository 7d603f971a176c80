//! 거래소 중립적 계좌 잔고와 보유 포지션.
//!
//! 실거래 어댑터와 모의 거래소는 서로 다른 필드명과 구조로 잔고를 돌려줍니다.
//! `normalize_balance`는 이를 하나의 정규 형식(`AccountSnapshot`)으로 변환합니다.
//!
//! # 지원 형식
//!
//! ```text
//! 모의 거래소:  { "cash": ..., "total_asset": ..., "positions": [ { "symbol", "quantity", ... } ] }
//! KIS 잔고조회: { "output1": [ { "pdno", "hldg_qty", "pchs_avg_pric", "prpr" } ],
//!                "output2": [ { "dnca_tot_amt", "tot_evlu_amt", "pchs_amt_smtl_amt", ... } ] }
//! ```
//!
//! 숫자는 JSON 숫자와 문자열 모두 허용합니다.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

// =============================================================================
// 보유 포지션 (Position)
// =============================================================================

/// 보유 포지션 (롱 전용).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// 종목 코드
    pub symbol: String,
    /// 종목명 (거래소가 제공하는 경우)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// 보유 수량
    pub quantity: Decimal,
    /// 평균 매입가
    pub avg_price: Decimal,
    /// 최근 시장가
    pub current_price: Decimal,
}

impl Position {
    /// 새 포지션 생성. 현재가는 평균 매입가로 초기화됩니다.
    pub fn new(symbol: impl Into<String>, quantity: Decimal, avg_price: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            name: None,
            quantity,
            avg_price,
            current_price: avg_price,
        }
    }

    /// 매입 금액.
    pub fn cost(&self) -> Decimal {
        self.quantity * self.avg_price
    }

    /// 평가 금액.
    pub fn eval_amount(&self) -> Decimal {
        self.quantity * self.current_price
    }

    /// 미실현 손익.
    pub fn unrealized_pnl(&self) -> Decimal {
        self.eval_amount() - self.cost()
    }

    /// 매수 체결 반영 (수량 가중 평균가).
    pub fn add(&mut self, quantity: Decimal, price: Decimal) {
        let total = self.quantity + quantity;
        if total > Decimal::ZERO {
            self.avg_price = (self.cost() + quantity * price) / total;
        }
        self.quantity = total;
    }
}

// =============================================================================
// 계좌 잔고 (AccountBalance)
// =============================================================================

/// 정규화된 계좌 잔고.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountBalance {
    /// 예수금 (주문 가능 현금)
    pub cash: Decimal,
    /// 총 자산 (현금 + 주식 평가액)
    pub total_asset: Decimal,
    /// 총 매입 금액
    pub total_purchase: Decimal,
    /// 주식 평가 금액 합계
    pub total_eval: Decimal,
    /// 실현 손익
    pub realized_pnl: Decimal,
    /// 미실현 손익
    pub unrealized_pnl: Decimal,
    /// 수익률 (%)
    pub total_return_pct: Decimal,
    /// 당일 손익 (거래소가 제공하는 경우)
    pub daily_pnl: Option<Decimal>,
}

impl AccountBalance {
    /// 주식 비중 (총 자산 대비 비현금 자산).
    pub fn exposure(&self) -> Decimal {
        if self.total_asset <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        (self.total_asset - self.cash) / self.total_asset
    }
}

/// 계좌 잔고와 포지션의 시점 스냅샷.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    /// 잔고
    pub balance: AccountBalance,
    /// 보유 포지션
    pub positions: Vec<Position>,
    /// 조회 시각
    pub fetched_at: DateTime<Utc>,
}

impl AccountSnapshot {
    /// 종목별 포지션 조회.
    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.iter().find(|p| p.symbol == symbol)
    }

    /// 당일 손익 (없으면 0).
    pub fn daily_pnl(&self) -> Decimal {
        self.balance.daily_pnl.unwrap_or(Decimal::ZERO)
    }
}

// =============================================================================
// 정규화
// =============================================================================

/// 잔고 응답 파싱 에러.
#[derive(Debug, Error)]
pub enum BalanceParseError {
    /// JSON 객체가 아님
    #[error("잔고 응답이 객체가 아닙니다")]
    NotAnObject,

    /// 잔고 관련 필드를 하나도 찾지 못함
    #[error("잔고 필드를 찾을 수 없습니다")]
    MissingFields,
}

const CASH_KEYS: &[&str] = &["cash", "deposit", "cash_balance", "dnca_tot_amt"];
const TOTAL_ASSET_KEYS: &[&str] = &["total_asset", "totalAsset", "tot_evlu_amt", "total_eval_amount"];
const TOTAL_PURCHASE_KEYS: &[&str] = &["total_purchase", "totalPurchase", "pchs_amt_smtl_amt"];
const TOTAL_EVAL_KEYS: &[&str] = &["total_eval", "totalEval", "stock_eval", "evlu_amt_smtl_amt", "scts_evlu_amt"];
const TOTAL_PNL_KEYS: &[&str] = &["total_pnl", "totalPnl", "unrealized_pnl", "evlu_pfls_smtl_amt"];
const REALIZED_KEYS: &[&str] = &["realized_pnl", "realizedPnl", "rlzt_pfls"];
const RETURN_KEYS: &[&str] = &["total_return", "totalReturn", "return_pct", "asst_icdc_erng_rt"];
const DAILY_PNL_KEYS: &[&str] = &["daily_pnl", "dailyPnl"];

const SUMMARY_KEYS: &[&str] = &["output2", "summary", "balance"];
const POSITION_LIST_KEYS: &[&str] = &["positions", "holdings", "output1"];

const SYMBOL_KEYS: &[&str] = &["symbol", "ticker", "code", "pdno"];
const NAME_KEYS: &[&str] = &["name", "asset_name", "prdt_name"];
const QUANTITY_KEYS: &[&str] = &["quantity", "qty", "hldg_qty"];
const AVG_PRICE_KEYS: &[&str] = &["avg_price", "avgPrice", "average_price", "pchs_avg_pric"];
const CURRENT_PRICE_KEYS: &[&str] = &["current_price", "currentPrice", "last_price", "prpr"];

/// 숫자 또는 문자열에서 Decimal 추출.
fn decimal_of(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => Decimal::from_str(&n.to_string())
            .or_else(|_| Decimal::from_scientific(&n.to_string()))
            .ok(),
        Value::String(s) => {
            let trimmed = s.trim().replace(',', "");
            if trimmed.is_empty() {
                None
            } else {
                Decimal::from_str(&trimmed).ok()
            }
        }
        _ => None,
    }
}

fn decimal_field(obj: &Value, keys: &[&str]) -> Option<Decimal> {
    keys.iter().find_map(|k| obj.get(*k).and_then(decimal_of))
}

fn string_field(obj: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| {
        obj.get(*k)
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    })
}

/// 요약 객체 위치 탐색 (최상위 또는 output2 등, 배열이면 첫 원소).
fn summary_object(payload: &Value) -> &Value {
    for key in SUMMARY_KEYS {
        match payload.get(*key) {
            Some(Value::Array(items)) if !items.is_empty() => return &items[0],
            Some(obj @ Value::Object(_)) => return obj,
            _ => {}
        }
    }
    payload
}

fn parse_positions(payload: &Value) -> Vec<Position> {
    let items = POSITION_LIST_KEYS
        .iter()
        .find_map(|k| payload.get(*k).and_then(Value::as_array));

    let Some(items) = items else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| {
            let symbol = string_field(item, SYMBOL_KEYS)?;
            let quantity = decimal_field(item, QUANTITY_KEYS).unwrap_or(Decimal::ZERO);
            if quantity <= Decimal::ZERO {
                return None;
            }
            let avg_price = decimal_field(item, AVG_PRICE_KEYS).unwrap_or(Decimal::ZERO);
            let current_price = decimal_field(item, CURRENT_PRICE_KEYS).unwrap_or(avg_price);
            Some(Position {
                symbol,
                name: string_field(item, NAME_KEYS),
                quantity,
                avg_price,
                current_price,
            })
        })
        .collect()
}

/// 거래소별 잔고 응답을 정규 형식으로 변환.
///
/// 현금이 직접 제공되지 않으면 `총 자산 - 주식 평가액`으로 추정합니다.
pub fn normalize_balance(payload: &Value) -> Result<AccountSnapshot, BalanceParseError> {
    if !payload.is_object() {
        return Err(BalanceParseError::NotAnObject);
    }

    let summary = summary_object(payload);
    let positions = parse_positions(payload);

    let cash = decimal_field(summary, CASH_KEYS);
    let total_asset = decimal_field(summary, TOTAL_ASSET_KEYS);

    if cash.is_none() && total_asset.is_none() && positions.is_empty() {
        return Err(BalanceParseError::MissingFields);
    }

    let positions_eval: Decimal = positions.iter().map(Position::eval_amount).sum();
    let positions_cost: Decimal = positions.iter().map(Position::cost).sum();

    let total_eval = decimal_field(summary, TOTAL_EVAL_KEYS).unwrap_or(positions_eval);
    let total_purchase = decimal_field(summary, TOTAL_PURCHASE_KEYS).unwrap_or(positions_cost);

    let (cash, total_asset) = match (cash, total_asset) {
        (Some(cash), Some(total)) => (cash, total),
        (Some(cash), None) => (cash, cash + total_eval),
        (None, Some(total)) => (total - total_eval, total),
        (None, None) => (Decimal::ZERO, total_eval),
    };

    let unrealized_pnl =
        decimal_field(summary, TOTAL_PNL_KEYS).unwrap_or(total_eval - total_purchase);
    let total_return_pct = decimal_field(summary, RETURN_KEYS).unwrap_or_else(|| {
        if total_purchase > Decimal::ZERO {
            unrealized_pnl / total_purchase * Decimal::ONE_HUNDRED
        } else {
            Decimal::ZERO
        }
    });

    Ok(AccountSnapshot {
        balance: AccountBalance {
            cash,
            total_asset,
            total_purchase,
            total_eval,
            realized_pnl: decimal_field(summary, REALIZED_KEYS).unwrap_or(Decimal::ZERO),
            unrealized_pnl,
            total_return_pct,
            daily_pnl: decimal_field(summary, DAILY_PNL_KEYS),
        },
        positions,
        fetched_at: Utc::now(),
    })
}

// =============================================================================
// 테스트
// =============================================================================

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_position_weighted_average() {
        let mut pos = Position::new("005930", dec!(10), dec!(70000));
        pos.add(dec!(10), dec!(80000));

        assert_eq!(pos.quantity, dec!(20));
        assert_eq!(pos.avg_price, dec!(75000));
    }

    #[test]
    fn test_position_unrealized_pnl() {
        let mut pos = Position::new("005930", dec!(100), dec!(70000));
        pos.current_price = dec!(75000);

        assert_eq!(pos.eval_amount(), dec!(7500000));
        assert_eq!(pos.unrealized_pnl(), dec!(500000));
    }

    #[test]
    fn test_normalize_paper_shape() {
        let payload = json!({
            "cash": 9000000,
            "total_asset": 10050000,
            "positions": [
                { "symbol": "005930", "quantity": 15, "avg_price": 70000, "current_price": 70000 }
            ]
        });

        let snapshot = normalize_balance(&payload).unwrap();
        assert_eq!(snapshot.balance.cash, dec!(9000000));
        assert_eq!(snapshot.balance.total_asset, dec!(10050000));
        assert_eq!(snapshot.balance.total_eval, dec!(1050000));
        assert_eq!(snapshot.positions.len(), 1);
        assert_eq!(snapshot.position("005930").unwrap().quantity, dec!(15));
    }

    #[test]
    fn test_normalize_kis_shape_with_strings() {
        let payload = json!({
            "rt_cd": "0",
            "output1": [
                { "pdno": "005930", "prdt_name": "삼성전자", "hldg_qty": "10",
                  "pchs_avg_pric": "70000.0000", "prpr": "75000" },
                { "pdno": "000660", "hldg_qty": "0", "pchs_avg_pric": "0", "prpr": "150000" }
            ],
            "output2": [
                { "dnca_tot_amt": "1,000,000", "tot_evlu_amt": "1750000",
                  "pchs_amt_smtl_amt": "700000", "evlu_amt_smtl_amt": "750000",
                  "evlu_pfls_smtl_amt": "50000", "asst_icdc_erng_rt": "7.14" }
            ]
        });

        let snapshot = normalize_balance(&payload).unwrap();
        assert_eq!(snapshot.balance.cash, dec!(1000000));
        assert_eq!(snapshot.balance.total_asset, dec!(1750000));
        assert_eq!(snapshot.balance.unrealized_pnl, dec!(50000));
        assert_eq!(snapshot.balance.total_return_pct, dec!(7.14));
        // 수량 0 종목은 제외
        assert_eq!(snapshot.positions.len(), 1);
        assert_eq!(snapshot.positions[0].name.as_deref(), Some("삼성전자"));
    }

    #[test]
    fn test_cash_estimated_from_total_asset() {
        let payload = json!({
            "totalAsset": "2000000",
            "holdings": [ { "code": "005930", "qty": 10, "avgPrice": 70000, "last_price": 80000 } ]
        });

        let snapshot = normalize_balance(&payload).unwrap();
        // 현금 = 총 자산 - 주식 평가액 (10 * 80000)
        assert_eq!(snapshot.balance.cash, dec!(1200000));
        assert_eq!(snapshot.balance.unrealized_pnl, dec!(100000));
    }

    #[test]
    fn test_normalize_rejects_garbage() {
        assert!(matches!(
            normalize_balance(&json!([1, 2, 3])),
            Err(BalanceParseError::NotAnObject)
        ));
        assert!(matches!(
            normalize_balance(&json!({ "msg": "ok" })),
            Err(BalanceParseError::MissingFields)
        ));
    }

    #[test]
    fn test_exposure() {
        let balance = AccountBalance {
            cash: dec!(100),
            total_asset: dec!(1000),
            ..Default::default()
        };
        assert_eq!(balance.exposure(), dec!(0.9));
    }
}
