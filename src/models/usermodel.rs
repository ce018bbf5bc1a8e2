use chrono::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone, Copy, sqlx::Type, PartialEq)]
#[sqlx(type_name = "user_role", rename_all = "snake_case")]
pub enum UserRole {
    Admin,
    Client,
    Freelancer,
    OrgAdmin,
    OrgOwner,
    User,
}

impl UserRole {
    pub fn to_str(&self) -> &str {
        match self {
            UserRole::Admin => "admin",
            UserRole::Client => "client",
            UserRole::Freelancer => "freelancer",
            UserRole::OrgAdmin => "org_admin",
            UserRole::OrgOwner => "org_owner",
            UserRole::User => "user",
        }
    }

    pub fn is_platform_admin(&self) -> bool {
        matches!(self, UserRole::Admin)
    }

    pub fn is_org_manager(&self) -> bool {
        matches!(self, UserRole::OrgAdmin | UserRole::OrgOwner)
    }
}

/// Subscription plan tier of a freelancer. The plan determines the service
/// fee percentage the platform deducts from escrow releases: lower tiers pay
/// a higher cut.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, sqlx::Type, PartialEq)]
#[sqlx(type_name = "subscription_plan", rename_all = "snake_case")]
pub enum SubscriptionPlan {
    Starter,
    Professional,
    Premium,
}

impl SubscriptionPlan {
    pub fn to_str(&self) -> &str {
        match self {
            SubscriptionPlan::Starter => "starter",
            SubscriptionPlan::Professional => "professional",
            SubscriptionPlan::Premium => "premium",
        }
    }

    /// Service fee in basis points of the gross escrow amount.
    pub fn service_fee_bps(&self) -> i64 {
        match self {
            SubscriptionPlan::Starter => 1000,      // 10%
            SubscriptionPlan::Professional => 800,  // 8%
            SubscriptionPlan::Premium => 600,       // 6%
        }
    }
}

#[derive(Debug, Deserialize, Serialize, sqlx::FromRow, Clone)]
pub struct User {
    pub id: uuid::Uuid,
    pub name: String,
    pub username: String,
    pub email: String,
    pub role: UserRole,
    pub plan: SubscriptionPlan,
    pub organization_id: Option<uuid::Uuid>,

    /// Default M-Pesa payout number, normalized MSISDN
    pub mpesa_number: Option<String>,

    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}
