mod caisse;
mod categorizer;
mod company;
mod insights;
mod invoice;
mod ledger;
mod money;
mod numbering;
mod payment;

pub use caisse::*;
pub use categorizer::*;
pub use company::*;
pub use insights::*;
pub use invoice::*;
pub use ledger::*;
pub use money::*;
pub use numbering::*;
pub use payment::*;
