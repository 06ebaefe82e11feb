use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Registration data scraped from the SINTEGRA/GO result page.
///
/// Every field is optional because the portal omits rows it has no value for.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryRecord {
    pub cnpj: Option<String>,
    pub state_registration: Option<String>,
    pub legal_name: Option<String>,
    pub taxpayer: Option<String>,
    pub trade_name: Option<String>,
    pub address: Option<String>,
    pub main_activity: Option<String>,
    pub auxiliary_unit: Option<String>,
    pub usage_condition: Option<String>,
    pub contract_end_date: Option<String>,
    pub tax_regime: Option<String>,
    pub registration_status: Option<String>,
    pub registration_status_date: Option<String>,
    pub registration_date: Option<String>,
    pub nfe_operations: Option<String>,
    pub notes: Option<String>,
    pub updated_on: Option<String>,
    pub consulted_on: Option<String>,
}

impl RegistryRecord {
    /// True when the lookup produced at least one field.
    pub fn has_data(&self) -> bool {
        [
            &self.cnpj,
            &self.state_registration,
            &self.legal_name,
            &self.taxpayer,
            &self.trade_name,
            &self.address,
            &self.main_activity,
            &self.auxiliary_unit,
            &self.usage_condition,
            &self.contract_end_date,
            &self.tax_regime,
            &self.registration_status,
            &self.registration_status_date,
            &self.registration_date,
            &self.nfe_operations,
            &self.notes,
            &self.updated_on,
            &self.consulted_on,
        ]
        .iter()
        .any(|field| field.is_some())
    }

    /// Store a scraped value under its field key. Unknown keys are ignored.
    pub fn set_field(&mut self, key: &str, value: String) {
        let slot = match key {
            "cnpj" => &mut self.cnpj,
            "state_registration" => &mut self.state_registration,
            "legal_name" => &mut self.legal_name,
            "taxpayer" => &mut self.taxpayer,
            "trade_name" => &mut self.trade_name,
            "address" => &mut self.address,
            "main_activity" => &mut self.main_activity,
            "auxiliary_unit" => &mut self.auxiliary_unit,
            "usage_condition" => &mut self.usage_condition,
            "contract_end_date" => &mut self.contract_end_date,
            "tax_regime" => &mut self.tax_regime,
            "registration_status" => &mut self.registration_status,
            "registration_status_date" => &mut self.registration_status_date,
            "registration_date" => &mut self.registration_date,
            "nfe_operations" => &mut self.nfe_operations,
            "notes" => &mut self.notes,
            "updated_on" => &mut self.updated_on,
            "consulted_on" => &mut self.consulted_on,
            _ => return,
        };
        *slot = Some(value);
    }
}

/// A registry record as kept in PostgreSQL, one row per CNPJ.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRegistryRecord {
    pub subject: String,
    #[serde(flatten)]
    pub record: RegistryRecord,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
