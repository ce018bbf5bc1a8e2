pub mod escrowmodels;
pub mod jobmodel;
pub mod usermodel;
pub mod walletmodels;
