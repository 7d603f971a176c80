//! 한국투자증권(KIS) 국내주식 어댑터.
//!
//! 현금 주문, 정정/취소, 잔고 조회 세 가지 REST 호출만 사용합니다.
//! 잔고 조회는 일시적 에러에 한해 재시도하고, 주문 제출과 취소는 재시도하지 않습니다.

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use trader_core::{BalancePayload, Exchange, ExchangeError, OrderAck, OrderKind, OrderRequest, Side};

use crate::retry::{with_retry, RetryConfig};

/// 실전투자 도메인.
pub const KIS_REAL_URL: &str = "https://openapi.koreainvestment.com:9443";
/// 모의투자 도메인.
pub const KIS_MOCK_URL: &str = "https://openapivts.koreainvestment.com:29443";

const ORDER_CASH_PATH: &str = "/uapi/domestic-stock/v1/trading/order-cash";
const ORDER_RVSECNCL_PATH: &str = "/uapi/domestic-stock/v1/trading/order-rvsecncl";
const INQUIRE_BALANCE_PATH: &str = "/uapi/domestic-stock/v1/trading/inquire-balance";

/// 초당 거래건수 초과 응답 코드.
const RATE_LIMIT_MSG_CD: &str = "EGW00201";

/// KIS 접속 설정.
#[derive(Debug)]
pub struct KisConfig {
    /// API 도메인
    pub base_url: String,
    /// 앱 키
    pub app_key: SecretString,
    /// 앱 시크릿
    pub app_secret: SecretString,
    /// 접근 토큰
    pub access_token: SecretString,
    /// 종합계좌번호 (앞 8자리)
    pub account_no: String,
    /// 계좌상품코드 (뒤 2자리)
    pub product_code: String,
    /// 모의투자 여부 (tr_id 접두어 결정)
    pub mock: bool,
}

impl KisConfig {
    /// 실전/모의 구분에 맞는 기본 도메인.
    pub fn default_base_url(mock: bool) -> &'static str {
        if mock {
            KIS_MOCK_URL
        } else {
            KIS_REAL_URL
        }
    }
}

/// KIS 국내주식 거래소.
pub struct KisExchange {
    config: KisConfig,
    client: Client,
    retry: RetryConfig,
    /// 주문번호 → 한국거래소 전송 주문조직번호 (정정/취소에 필요)
    org_numbers: RwLock<HashMap<String, String>>,
}

impl KisExchange {
    /// 새 어댑터 생성.
    pub fn new(config: KisConfig) -> Self {
        Self {
            config,
            client: Client::new(),
            retry: RetryConfig::default(),
            org_numbers: RwLock::new(HashMap::new()),
        }
    }

    /// 잔고 조회 재시도 설정 변경.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// 환경에 맞는 거래 ID (모의투자는 `V` 접두어).
    fn tr_id(&self, real: &str) -> String {
        if self.config.mock {
            format!("V{}", &real[1..])
        } else {
            real.to_string()
        }
    }

    fn authorized(&self, builder: RequestBuilder, tr_id: &str) -> RequestBuilder {
        builder
            .header("content-type", "application/json; charset=utf-8")
            .header(
                "authorization",
                format!("Bearer {}", self.config.access_token.expose_secret()),
            )
            .header("appkey", self.config.app_key.expose_secret())
            .header("appsecret", self.config.app_secret.expose_secret())
            .header("tr_id", tr_id)
            .header("custtype", "P")
    }

    async fn post(&self, path: &str, tr_id: &str, body: Value) -> Result<Value, ExchangeError> {
        let url = format!("{}{}", self.config.base_url, path);
        debug!(path, tr_id, "KIS 요청");
        let builder = self.authorized(self.client.post(&url), tr_id).json(&body);
        Self::send(builder).await
    }

    /// 요청 전송 및 공통 응답 처리.
    async fn send(builder: RequestBuilder) -> Result<Value, ExchangeError> {
        let response = builder
            .send()
            .await
            .map_err(|e| ExchangeError::Network(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ExchangeError::RateLimited);
        }

        let text = response
            .text()
            .await
            .map_err(|e| ExchangeError::Network(e.to_string()))?;

        let body: Value = match serde_json::from_str(&text) {
            Ok(v) => v,
            Err(_) if !status.is_success() => {
                return Err(ExchangeError::Api {
                    code: status.as_u16().to_string(),
                    message: text,
                })
            }
            Err(e) => return Err(ExchangeError::Parse(format!("{}: {}", e, text))),
        };

        let msg_cd = body["msg_cd"].as_str().unwrap_or_default();
        if msg_cd == RATE_LIMIT_MSG_CD {
            return Err(ExchangeError::RateLimited);
        }

        match body["rt_cd"].as_str() {
            Some("0") => Ok(body),
            _ => Err(ExchangeError::Api {
                code: if msg_cd.is_empty() {
                    status.as_u16().to_string()
                } else {
                    msg_cd.to_string()
                },
                message: body["msg1"].as_str().unwrap_or_default().trim().to_string(),
            }),
        }
    }

    fn order_division(kind: OrderKind) -> &'static str {
        match kind {
            OrderKind::Market => "01",
            OrderKind::Limit => "00",
        }
    }

    fn order_number(body: &Value) -> Result<(String, String), ExchangeError> {
        let output = &body["output"];
        let order_id = output["ODNO"]
            .as_str()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ExchangeError::Parse("응답에 ODNO 없음".to_string()))?;
        let org_no = output["KRX_FWDG_ORD_ORGNO"].as_str().unwrap_or_default();
        Ok((order_id.to_string(), org_no.to_string()))
    }

    /// 정정/취소 공통 요청.
    async fn revise_or_cancel(
        &self,
        order_id: &str,
        division: &str,
        kind: OrderKind,
        quantity: Decimal,
        price: Decimal,
    ) -> Result<Value, ExchangeError> {
        let org_no = self
            .org_numbers
            .read()
            .await
            .get(order_id)
            .cloned()
            .unwrap_or_default();

        let body = json!({
            "CANO": self.config.account_no,
            "ACNT_PRDT_CD": self.config.product_code,
            "KRX_FWDG_ORD_ORGNO": org_no,
            "ORGN_ODNO": order_id,
            "ORD_DVSN": Self::order_division(kind),
            "RVSE_CNCL_DVSN_CD": division,
            "ORD_QTY": quantity.trunc().to_string(),
            "ORD_UNPR": price.trunc().to_string(),
            "QTY_ALL_ORD_YN": "N",
        });

        self.post(ORDER_RVSECNCL_PATH, &self.tr_id("TTTC0803U"), body)
            .await
    }

    async fn fetch_balance_once(&self) -> Result<Value, ExchangeError> {
        let url = format!("{}{}", self.config.base_url, INQUIRE_BALANCE_PATH);
        let builder = self
            .authorized(self.client.get(&url), &self.tr_id("TTTC8434R"))
            .query(&[
                ("CANO", self.config.account_no.as_str()),
                ("ACNT_PRDT_CD", self.config.product_code.as_str()),
                ("AFHR_FLPR_YN", "N"),
                ("OFL_YN", ""),
                ("INQR_DVSN", "02"),
                ("UNPR_DVSN", "01"),
                ("FUND_STTL_ICLD_YN", "N"),
                ("FNCG_AMT_AUTO_RDPT_YN", "N"),
                ("PRCS_DVSN", "00"),
                ("CTX_AREA_FK100", ""),
                ("CTX_AREA_NK100", ""),
            ]);
        Self::send(builder).await
    }
}

#[async_trait]
impl Exchange for KisExchange {
    fn name(&self) -> &str {
        "kis"
    }

    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderAck, ExchangeError> {
        let tr_id = match request.side {
            Side::Buy => self.tr_id("TTTC0802U"),
            Side::Sell => self.tr_id("TTTC0801U"),
        };
        let price = match request.kind {
            OrderKind::Market => Decimal::ZERO,
            OrderKind::Limit => request.price,
        };

        let body = json!({
            "CANO": self.config.account_no,
            "ACNT_PRDT_CD": self.config.product_code,
            "PDNO": request.symbol,
            "ORD_DVSN": Self::order_division(request.kind),
            "ORD_QTY": request.quantity.trunc().to_string(),
            "ORD_UNPR": price.trunc().to_string(),
        });

        let response = self.post(ORDER_CASH_PATH, &tr_id, body).await?;
        let (order_id, org_no) = Self::order_number(&response)?;

        info!(
            order_id = %order_id,
            symbol = %request.symbol,
            side = %request.side,
            quantity = %request.quantity,
            price = %price,
            "KIS 주문 접수"
        );

        self.org_numbers
            .write()
            .await
            .insert(order_id.clone(), org_no);
        Ok(OrderAck::new(order_id))
    }

    async fn cancel_order(
        &self,
        order_id: &str,
        symbol: &str,
        quantity: Decimal,
    ) -> Result<(), ExchangeError> {
        self.revise_or_cancel(order_id, "02", OrderKind::Limit, quantity, Decimal::ZERO)
            .await?;
        self.org_numbers.write().await.remove(order_id);
        info!(order_id, symbol, quantity = %quantity, "KIS 주문 취소");
        Ok(())
    }

    async fn modify_order(
        &self,
        order_id: &str,
        symbol: &str,
        quantity: Decimal,
        price: Decimal,
    ) -> Result<OrderAck, ExchangeError> {
        let kind = OrderKind::from_price(price);
        let response = self
            .revise_or_cancel(order_id, "01", kind, quantity, price)
            .await?;
        let (new_id, org_no) = Self::order_number(&response)?;

        let mut org_numbers = self.org_numbers.write().await;
        org_numbers.remove(order_id);
        org_numbers.insert(new_id.clone(), org_no);

        info!(order_id, new_order_id = %new_id, symbol, "KIS 주문 정정");
        Ok(OrderAck::new(new_id))
    }

    async fn fetch_balance(&self) -> Result<BalancePayload, ExchangeError> {
        let body = with_retry(&self.retry, || self.fetch_balance_once()).await;
        if let Err(e) = &body {
            warn!(error = %e, "KIS 잔고 조회 실패");
        }
        body.map(BalancePayload)
    }
}
