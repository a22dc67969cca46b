use super::{
    AnalysisStage, AnalysisUnavailable, DemandLevel, RiskLevel, SellabilityAnalyzer,
    SellabilityRequest, SellabilityResult,
};
use crate::llm::{LlmClient, LlmMessage, parse_json_reply};
use crate::market_value::true_discount;
use crate::models::Confidence;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

const SYSTEM_PROMPT: &str = "You assess how easily a second-hand item resells. \
Reply with a single JSON object with keys verified_market_value (number), \
sellability_score (0-100), demand_level (low|medium|high), expected_days_to_sell, \
authenticity_risk (low|medium|high), recommended_offer_price, recommended_list_price, \
resale_strategy, confidence (low|medium|high) and meets_threshold (bool: true only when \
the item is a clear, low-risk flip at the asking price).";

pub struct LlmSellabilityAnalyzer {
    llm: Arc<LlmClient>,
}

impl LlmSellabilityAnalyzer {
    pub fn new(llm: Arc<LlmClient>) -> Self {
        Self { llm }
    }
}

#[derive(Debug, Deserialize)]
struct SellabilityReply {
    #[serde(default)]
    verified_market_value: Option<f64>,
    sellability_score: f64,
    demand_level: DemandLevel,
    #[serde(default)]
    expected_days_to_sell: Option<u32>,
    authenticity_risk: RiskLevel,
    #[serde(default)]
    recommended_offer_price: Option<f64>,
    #[serde(default)]
    recommended_list_price: Option<f64>,
    #[serde(default)]
    resale_strategy: String,
    confidence: Confidence,
    #[serde(default)]
    meets_threshold: bool,
}

pub(crate) fn prompt(request: &SellabilityRequest<'_>) -> String {
    let id = request.identification;
    let sold = &request.market.sold;
    let active = &request.market.active;
    let lowest_active = active.iter().copied().fold(f64::INFINITY, f64::min);
    format!(
        "Item: {}\nIdentified as: {} {} {}\nCondition: {}\nAsking price: ${:.2}\n\
         Recent eBay sales: {} (median ${:.2})\nActive listings: {}{}",
        request.title,
        id.brand.as_deref().unwrap_or("unknown brand"),
        id.model.as_deref().unwrap_or(""),
        id.variant.as_deref().unwrap_or(""),
        id.condition.as_deref().unwrap_or("unknown"),
        request.asking_price,
        sold.len(),
        request.market_signal,
        active.len(),
        if lowest_active.is_finite() {
            format!(" (lowest ${lowest_active:.2})")
        } else {
            String::new()
        },
    )
}

/// Builds the result from a model reply. Missing prices fall back to the
/// fetched market signal; the score is clamped into 0..=100.
pub(crate) fn parse_reply(
    text: &str,
    request: &SellabilityRequest<'_>,
) -> Result<SellabilityResult, AnalysisUnavailable> {
    let reply: SellabilityReply = parse_json_reply(text)
        .map_err(|err| AnalysisUnavailable::from_llm(AnalysisStage::Sellability, &err))?;
    let verified = reply
        .verified_market_value
        .filter(|value| value.is_finite() && *value > 0.0)
        .unwrap_or(request.market_signal);
    Ok(SellabilityResult {
        verified_market_value: verified,
        true_discount_percent: true_discount(verified, request.asking_price),
        sellability_score: reply.sellability_score.clamp(0.0, 100.0).round() as u8,
        demand_level: reply.demand_level,
        expected_days_to_sell: reply.expected_days_to_sell.unwrap_or(30),
        authenticity_risk: reply.authenticity_risk,
        recommended_offer_price: reply
            .recommended_offer_price
            .unwrap_or(request.asking_price),
        recommended_list_price: reply.recommended_list_price.unwrap_or(verified),
        resale_strategy: reply.resale_strategy,
        confidence: reply.confidence,
        meets_threshold: reply.meets_threshold,
    })
}

#[async_trait]
impl SellabilityAnalyzer for LlmSellabilityAnalyzer {
    async fn assess(
        &self,
        request: &SellabilityRequest<'_>,
    ) -> Result<SellabilityResult, AnalysisUnavailable> {
        let function = self.llm.config().sellability_function.clone();
        let messages = [LlmMessage::system(SYSTEM_PROMPT), LlmMessage::user(prompt(request))];
        let response = self
            .llm
            .chat(&function, &messages)
            .await
            .map_err(|err| AnalysisUnavailable::from_llm(AnalysisStage::Sellability, &err))?;
        parse_reply(&response.text, request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{IdentificationResult, MarketPriceSnapshot, UnavailableReason};

    fn identification() -> IdentificationResult {
        IdentificationResult {
            brand: Some("Sony".into()),
            model: Some("WH-1000XM4".into()),
            variant: None,
            condition: Some("like new".into()),
            category: Some("electronics".into()),
            worth_investigating: true,
            search_query: "sony wh-1000xm4".into(),
        }
    }

    #[test]
    fn reply_fills_gaps_from_market_signal() {
        let id = identification();
        let market = MarketPriceSnapshot {
            sold: vec![180.0, 200.0, 220.0],
            active: vec![230.0, 210.0],
        };
        let request = SellabilityRequest {
            title: "Sony headphones",
            asking_price: 80.0,
            identification: &id,
            market: &market,
            market_signal: 200.0,
        };
        let text = r#"{"sellability_score": 140, "demand_level": "high",
            "authenticity_risk": "medium", "confidence": "medium", "meets_threshold": true}"#;
        let result = parse_reply(text, &request).unwrap();
        assert_eq!(result.verified_market_value, 200.0);
        assert_eq!(result.true_discount_percent, 60);
        assert_eq!(result.sellability_score, 100);
        assert_eq!(result.recommended_list_price, 200.0);
        assert_eq!(result.demand_level, DemandLevel::High);
        assert!(result.meets_threshold);
        assert!(prompt(&request).contains("(lowest $210.00)"));
    }

    #[test]
    fn reply_missing_required_fields_is_invalid() {
        let id = identification();
        let market = MarketPriceSnapshot::default();
        let request = SellabilityRequest {
            title: "Sony headphones",
            asking_price: 80.0,
            identification: &id,
            market: &market,
            market_signal: 200.0,
        };
        let err = parse_reply(r#"{"sellability_score": 50}"#, &request).unwrap_err();
        assert_eq!(err.stage, AnalysisStage::Sellability);
        assert_eq!(err.reason, UnavailableReason::InvalidResponse);
    }
}
