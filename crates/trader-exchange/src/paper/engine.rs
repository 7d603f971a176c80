//! 모의 주문 매칭 엔진과 계좌 원장.
//!
//! 주문 제출 시에는 대기열에만 등록하고, 매칭은 호가 수신(`on_quote`) 시점에만 수행합니다.
//!
//! # 매칭 규칙
//!
//! - 유동성: 주문 수량이 해당 호가 잔량보다 크면 대기 (부분 체결 없음)
//! - 가격: 시장가는 항상 매칭, 지정가 매수는 `지정가 >= 매도호가`, 지정가 매도는 `지정가 <= 매수호가`
//! - 슬리피지: 시장가만 불리한 방향으로 `0 ~ 상한` 범위의 무작위 가산, 지정가는 호가 그대로 체결
//! - 정산: 매수는 `수량 × 체결가 + 수수료` 차감, 매도는 보유 수량 확인 후 `수량 × 체결가 - 수수료` 가산
//!
//! 잔고나 보유 수량이 부족하면 주문은 거부되어 대기열에서 제거됩니다.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use rand::{Rng, RngCore};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use trader_core::{OrderKind, OrderRequest, Position, Quote, Side};

/// 슬리피지 난수 해상도 (상한을 10,000 단계로 나눔).
const SLIPPAGE_STEPS: u32 = 10_000;

// ==================== 설정 ====================

/// 모의 거래소 설정.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperConfig {
    /// 초기 자금 (KRW)
    pub initial_cash: Decimal,
    /// 매수 수수료율
    pub buy_fee_rate: Decimal,
    /// 매도 수수료율
    pub sell_fee_rate: Decimal,
    /// 매도 거래세율
    pub sell_tax_rate: Decimal,
    /// 시장가 최대 슬리피지율
    pub max_slippage_rate: Decimal,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            initial_cash: dec!(10_000_000),
            buy_fee_rate: dec!(0.00015),
            sell_fee_rate: dec!(0.00015),
            sell_tax_rate: dec!(0.0018),
            max_slippage_rate: dec!(0.0005),
        }
    }
}

impl PaperConfig {
    /// 매도 시 총 비용률 (수수료 + 거래세).
    pub fn sell_cost_rate(&self) -> Decimal {
        self.sell_fee_rate + self.sell_tax_rate
    }
}

// ==================== 체결 결과 ====================

/// 모의 체결.
#[derive(Debug, Clone, PartialEq)]
pub struct PaperTrade {
    /// 주문 ID
    pub order_id: String,
    /// 종목 코드
    pub symbol: String,
    /// 방향
    pub side: Side,
    /// 체결 수량
    pub quantity: Decimal,
    /// 체결 가격
    pub price: Decimal,
    /// 수수료 (매도는 거래세 포함)
    pub fee: Decimal,
    /// 실현 손익 (매도만)
    pub realized_pnl: Option<Decimal>,
    /// 체결 시각
    pub timestamp: DateTime<Utc>,
}

/// 호가 매칭 결과.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    /// 체결
    Filled(PaperTrade),
    /// 정산 불가로 거부 (대기열에서 제거됨)
    Rejected {
        order_id: String,
        symbol: String,
        side: Side,
        reason: String,
    },
}

// ==================== 원장 ====================

/// 모의 계좌 원장.
///
/// 현금과 포지션을 한 곳에서 관리하며, 모든 변경은 정산 함수를 거칩니다.
#[derive(Debug, Clone, PartialEq)]
pub struct PaperLedger {
    /// 예수금
    pub cash: Decimal,
    /// 누적 실현 손익
    pub realized_pnl: Decimal,
    /// 초기 자금
    pub initial_cash: Decimal,
    /// 종목별 포지션
    pub positions: BTreeMap<String, Position>,
}

impl PaperLedger {
    /// 초기 자금으로 원장 생성.
    pub fn new(initial_cash: Decimal) -> Self {
        Self {
            cash: initial_cash,
            realized_pnl: Decimal::ZERO,
            initial_cash,
            positions: BTreeMap::new(),
        }
    }

    /// 보유 수량.
    pub fn holding(&self, symbol: &str) -> Decimal {
        self.positions
            .get(symbol)
            .map(|p| p.quantity)
            .unwrap_or(Decimal::ZERO)
    }

    /// 주식 평가 금액.
    pub fn stock_eval(&self) -> Decimal {
        self.positions.values().map(Position::eval_amount).sum()
    }

    /// 매입 금액 합계.
    pub fn total_purchase(&self) -> Decimal {
        self.positions.values().map(Position::cost).sum()
    }

    /// 총 자산.
    pub fn total_asset(&self) -> Decimal {
        self.cash + self.stock_eval()
    }

    /// 시세 반영.
    pub fn mark(&mut self, symbol: &str, price: Decimal) {
        if price <= Decimal::ZERO {
            return;
        }
        if let Some(position) = self.positions.get_mut(symbol) {
            position.current_price = price;
        }
    }

    /// 매수 정산.
    fn settle_buy(
        &mut self,
        symbol: &str,
        quantity: Decimal,
        price: Decimal,
        fee_rate: Decimal,
    ) -> Result<Decimal, String> {
        let notional = quantity * price;
        let fee = notional * fee_rate;
        let required = notional + fee;

        if required > self.cash {
            return Err(format!(
                "잔고 부족: 필요 {}, 가용 {}",
                required.round_dp(2),
                self.cash.round_dp(2)
            ));
        }

        self.cash -= required;
        self.positions
            .entry(symbol.to_string())
            .and_modify(|p| {
                p.add(quantity, price);
                p.current_price = price;
            })
            .or_insert_with(|| Position::new(symbol, quantity, price));

        Ok(fee)
    }

    /// 매도 정산. 반환값은 (수수료, 실현 손익).
    fn settle_sell(
        &mut self,
        symbol: &str,
        quantity: Decimal,
        price: Decimal,
        cost_rate: Decimal,
    ) -> Result<(Decimal, Decimal), String> {
        let held = self.holding(symbol);
        if held < quantity {
            return Err(format!("보유 수량 부족: 요청 {}, 보유 {}", quantity, held));
        }

        let notional = quantity * price;
        let fee = notional * cost_rate;

        let Some(position) = self.positions.get_mut(symbol) else {
            return Err(format!("보유 포지션 없음: {}", symbol));
        };

        let realized = (price - position.avg_price) * quantity - fee;
        position.quantity -= quantity;
        position.current_price = price;
        if position.quantity.is_zero() {
            self.positions.remove(symbol);
        }

        self.cash += notional - fee;
        self.realized_pnl += realized;

        Ok((fee, realized))
    }

    /// 거래소 잔고 응답 형식의 스냅샷.
    ///
    /// 금액은 정밀도 유지를 위해 문자열로 직렬화합니다.
    pub fn balance_json(&self) -> Value {
        let stock_eval = self.stock_eval();
        let total_purchase = self.total_purchase();
        let total_asset = self.cash + stock_eval;
        let total_return = if self.initial_cash > Decimal::ZERO {
            (total_asset - self.initial_cash) / self.initial_cash * Decimal::ONE_HUNDRED
        } else {
            Decimal::ZERO
        };

        let positions: Vec<Value> = self
            .positions
            .values()
            .map(|p| {
                json!({
                    "symbol": p.symbol,
                    "quantity": p.quantity.to_string(),
                    "avg_price": p.avg_price.to_string(),
                    "current_price": p.current_price.to_string(),
                    "eval_amount": p.eval_amount().to_string(),
                    "unrealized_pnl": p.unrealized_pnl().to_string(),
                })
            })
            .collect();

        json!({
            "cash": self.cash.to_string(),
            "total_asset": total_asset.to_string(),
            "total_purchase": total_purchase.to_string(),
            "total_eval": stock_eval.to_string(),
            "total_pnl": (stock_eval - total_purchase).to_string(),
            "realized_pnl": self.realized_pnl.to_string(),
            "total_return": total_return.round_dp(4).to_string(),
            "positions": positions,
        })
    }
}

// ==================== 대기 주문 ====================

/// 매칭 대기 주문.
#[derive(Debug, Clone, PartialEq)]
pub struct PaperPendingOrder {
    /// 주문 ID
    pub order_id: String,
    /// 종목 코드
    pub symbol: String,
    /// 방향
    pub side: Side,
    /// 주문 유형
    pub kind: OrderKind,
    /// 수량
    pub quantity: Decimal,
    /// 지정가 (시장가는 0)
    pub price: Decimal,
    /// 접수 시각
    pub created_at: DateTime<Utc>,
}

impl PaperPendingOrder {
    /// 호가 기준 가격 조건 확인.
    fn price_matches(&self, quote: &Quote) -> bool {
        match (self.kind, self.side) {
            (OrderKind::Market, _) => true,
            (OrderKind::Limit, Side::Buy) => self.price >= quote.ask,
            (OrderKind::Limit, Side::Sell) => self.price <= quote.bid,
        }
    }

    /// 호가 잔량 기준 유동성 확인 (전량 체결 가능 여부).
    fn liquidity_available(&self, quote: &Quote) -> bool {
        let depth = match self.side {
            Side::Buy => quote.ask_size,
            Side::Sell => quote.bid_size,
        };
        self.quantity <= depth
    }
}

// ==================== 매칭 엔진 ====================

/// 모의 주문 매칭 엔진.
#[derive(Debug, Default)]
pub struct PaperOrderEngine {
    /// 종목별 대기 주문 (접수 순)
    pending: HashMap<String, Vec<PaperPendingOrder>>,
    /// 주문 ID 카운터
    next_order_id: u64,
    /// 세션 구분자 (재시작 간 ID 중복 방지)
    session: Option<String>,
}

impl PaperOrderEngine {
    /// 새 엔진 생성.
    pub fn new() -> Self {
        Self {
            pending: HashMap::new(),
            next_order_id: 1,
            session: None,
        }
    }

    /// 세션 구분자를 붙여 ID를 발급하는 엔진 생성.
    ///
    /// ID 형식: `PAPER-{session}-{seq:08}`
    pub fn with_session(session: impl Into<String>) -> Self {
        Self {
            session: Some(session.into()),
            ..Self::new()
        }
    }

    /// 고유 주문 ID 생성.
    fn generate_order_id(&mut self) -> String {
        let id = match &self.session {
            Some(session) => format!("PAPER-{}-{:08}", session, self.next_order_id),
            None => format!("PAPER-{:08}", self.next_order_id),
        };
        self.next_order_id += 1;
        id
    }

    /// 주문 접수. 매칭은 수행하지 않습니다.
    pub fn submit(&mut self, request: &OrderRequest, now: DateTime<Utc>) -> String {
        let order_id = self.generate_order_id();
        let price = match request.kind {
            OrderKind::Market => Decimal::ZERO,
            OrderKind::Limit => request.price,
        };

        self.pending
            .entry(request.symbol.clone())
            .or_default()
            .push(PaperPendingOrder {
                order_id: order_id.clone(),
                symbol: request.symbol.clone(),
                side: request.side,
                kind: request.kind,
                quantity: request.quantity,
                price,
                created_at: now,
            });

        debug!(
            order_id = %order_id,
            symbol = %request.symbol,
            side = %request.side,
            quantity = %request.quantity,
            price = %price,
            "[PaperEngine] 주문 접수"
        );

        order_id
    }

    /// 주문 취소.
    pub fn cancel(&mut self, order_id: &str) -> Option<PaperPendingOrder> {
        let mut removed = None;
        for orders in self.pending.values_mut() {
            if let Some(idx) = orders.iter().position(|o| o.order_id == order_id) {
                removed = Some(orders.remove(idx));
                break;
            }
        }
        self.pending.retain(|_, orders| !orders.is_empty());
        removed
    }

    /// 주문 정정 (같은 ID 유지).
    pub fn modify(&mut self, order_id: &str, quantity: Decimal, price: Decimal) -> bool {
        let Some(order) = self
            .pending
            .values_mut()
            .flat_map(|orders| orders.iter_mut())
            .find(|o| o.order_id == order_id)
        else {
            return false;
        };

        order.quantity = quantity;
        order.kind = OrderKind::from_price(price);
        order.price = if order.kind == OrderKind::Limit { price } else { Decimal::ZERO };
        true
    }

    /// 대기 주문 목록 (접수 순).
    pub fn pending_orders(&self) -> Vec<PaperPendingOrder> {
        let mut orders: Vec<PaperPendingOrder> =
            self.pending.values().flatten().cloned().collect();
        orders.sort_by(|a, b| a.order_id.cmp(&b.order_id));
        orders
    }

    /// 종목의 대기 주문 수.
    pub fn pending_count(&self, symbol: &str) -> usize {
        self.pending.get(symbol).map(Vec::len).unwrap_or(0)
    }

    /// 시장가 슬리피지율 추출 (0 ~ 상한).
    fn draw_slippage(cap: Decimal, rng: &mut dyn RngCore) -> Decimal {
        if cap <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let step = rng.gen_range(0..=SLIPPAGE_STEPS);
        cap * Decimal::from(step) / Decimal::from(SLIPPAGE_STEPS)
    }

    /// 호가 수신 시 해당 종목 대기 주문 매칭.
    ///
    /// 체결 또는 거부된 주문은 같은 처리 안에서 대기열에서 제거됩니다.
    pub fn on_quote(
        &mut self,
        quote: &Quote,
        ledger: &mut PaperLedger,
        config: &PaperConfig,
        rng: &mut dyn RngCore,
    ) -> Vec<MatchOutcome> {
        ledger.mark(&quote.symbol, quote.mark_price());

        let Some(orders) = self.pending.get_mut(&quote.symbol) else {
            return Vec::new();
        };

        let mut outcomes = Vec::new();
        let mut remaining = Vec::with_capacity(orders.len());

        for order in orders.drain(..) {
            let touch = match order.side {
                Side::Buy => quote.ask,
                Side::Sell => quote.bid,
            };

            if touch <= Decimal::ZERO
                || !order.liquidity_available(quote)
                || !order.price_matches(quote)
            {
                remaining.push(order);
                continue;
            }

            let exec_price = match order.kind {
                OrderKind::Limit => touch,
                OrderKind::Market => {
                    let slip = Self::draw_slippage(config.max_slippage_rate, rng);
                    match order.side {
                        Side::Buy => touch * (Decimal::ONE + slip),
                        Side::Sell => touch * (Decimal::ONE - slip),
                    }
                }
            };

            let settled = match order.side {
                Side::Buy => ledger
                    .settle_buy(&order.symbol, order.quantity, exec_price, config.buy_fee_rate)
                    .map(|fee| (fee, None)),
                Side::Sell => ledger
                    .settle_sell(&order.symbol, order.quantity, exec_price, config.sell_cost_rate())
                    .map(|(fee, pnl)| (fee, Some(pnl))),
            };

            match settled {
                Ok((fee, realized_pnl)) => {
                    info!(
                        order_id = %order.order_id,
                        symbol = %order.symbol,
                        side = %order.side,
                        quantity = %order.quantity,
                        price = %exec_price,
                        fee = %fee.round_dp(2),
                        "[PaperEngine] 체결"
                    );
                    outcomes.push(MatchOutcome::Filled(PaperTrade {
                        order_id: order.order_id,
                        symbol: order.symbol,
                        side: order.side,
                        quantity: order.quantity,
                        price: exec_price,
                        fee,
                        realized_pnl,
                        timestamp: quote.timestamp,
                    }));
                }
                Err(reason) => {
                    warn!(
                        order_id = %order.order_id,
                        symbol = %order.symbol,
                        reason = %reason,
                        "[PaperEngine] 정산 불가, 주문 거부"
                    );
                    outcomes.push(MatchOutcome::Rejected {
                        order_id: order.order_id,
                        symbol: order.symbol,
                        side: order.side,
                        reason,
                    });
                }
            }
        }

        if remaining.is_empty() {
            self.pending.remove(&quote.symbol);
        } else {
            *orders = remaining;
        }

        outcomes
    }
}
