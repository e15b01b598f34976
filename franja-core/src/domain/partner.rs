//! Counterparty record

use serde::{Deserialize, Serialize};

/// Whether a counterparty is an organization or a natural person
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartnerType {
    Company,
    Individual,
}

impl PartnerType {
    pub fn from_is_company(is_company: Option<bool>) -> Self {
        if is_company.unwrap_or(false) {
            PartnerType::Company
        } else {
            PartnerType::Individual
        }
    }

    /// Label written to the partner report
    pub fn label(&self) -> &'static str {
        match self {
            PartnerType::Company => "Empresa",
            PartnerType::Individual => "Persona",
        }
    }
}

/// One counterparty referenced by the extracted invoices
///
/// Optional contact fields are empty strings when absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartnerRecord {
    pub name: String,
    pub identification_type: String,
    pub identification_number: String,
    pub partner_type: PartnerType,
    pub email: String,
    pub mobile: String,
    pub address: String,
}
