//! Provider selection for collections and payouts.
//!
//! An explicit preference list wins; otherwise the country tables decide the
//! order in which providers are tried. A provider is only ever picked if its
//! capabilities cover the method and currency.

use crate::config::RoutingTable;
use crate::domain::money::{CountryCode, Currency};
use crate::domain::provider::{PaymentMethod, PayoutMethod, Provider};
use crate::error::{PaymentError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct RouteRequest {
    pub amount_minor: i64,
    pub currency: Currency,
    pub country: CountryCode,
    pub method: PaymentMethod,
    pub phone_number: Option<String>,
    pub preferences: Vec<Provider>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PayoutRouteRequest {
    pub currency: Currency,
    pub country: Option<CountryCode>,
    pub method: PayoutMethod,
    pub preferences: Vec<Provider>,
}

fn has_phone(phone: &Option<String>) -> bool {
    phone.as_deref().is_some_and(|p| !p.trim().is_empty())
}

/// Country-table order for a market. `None` means no country is known.
fn country_candidates(table: &RoutingTable, country: Option<&CountryCode>, mobile: bool) -> Vec<Provider> {
    let Some(country) = country else {
        return if mobile {
            vec![Provider::Flutterwave]
        } else {
            vec![Provider::Stripe, Provider::Paystack, Provider::Flutterwave]
        };
    };
    let mobile_country = table.is_mobile_money_country(country);
    if mobile {
        return if mobile_country {
            vec![Provider::Flutterwave]
        } else {
            Vec::new()
        };
    }
    let mut candidates = Vec::new();
    if table.is_regional_card_country(country) {
        candidates.push(Provider::Paystack);
    }
    if mobile_country {
        candidates.push(Provider::Flutterwave);
    }
    candidates.push(Provider::Stripe);
    candidates
}

pub fn select_provider(table: &RoutingTable, request: &RouteRequest) -> Result<Provider> {
    if request.method == PaymentMethod::MobileMoney && !has_phone(&request.phone_number) {
        return Err(PaymentError::ValidationError(
            "phoneNumber is required for mobile money payments".into(),
        ));
    }
    if request.amount_minor <= 0 {
        return Err(PaymentError::ValidationError(
            "Amount must be positive".into(),
        ));
    }

    let candidates = if request.preferences.is_empty() {
        country_candidates(
            table,
            Some(&request.country),
            request.method == PaymentMethod::MobileMoney,
        )
    } else {
        request.preferences.clone()
    };

    candidates
        .into_iter()
        .find(|p| p.capabilities().can_collect(request.method, request.currency))
        .ok_or_else(|| {
            PaymentError::RoutingError(format!(
                "No provider supports {} payments in {} for country {}",
                request.method, request.currency, request.country
            ))
        })
}

pub fn select_payout_provider(table: &RoutingTable, request: &PayoutRouteRequest) -> Result<Provider> {
    let candidates = if request.preferences.is_empty() {
        country_candidates(
            table,
            request.country.as_ref(),
            request.method == PayoutMethod::MobileMoney,
        )
    } else {
        request.preferences.clone()
    };

    candidates
        .into_iter()
        .find(|p| p.capabilities().can_pay_out(request.method, request.currency))
        .ok_or_else(|| {
            let country = request
                .country
                .as_ref()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            PaymentError::RoutingError(format!(
                "No provider supports {} payouts in {} for country {}",
                request.method, request.currency, country
            ))
        })
}
