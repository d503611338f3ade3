pub mod accumulator;
pub mod cluster;
pub mod error;
pub mod fasta;
pub mod filter;
pub mod metadata;
pub mod record;
pub mod schema;
pub mod selection;
pub mod split;
pub mod structures;
pub mod table;

#[cfg(feature = "python")]
mod python;

pub use accumulator::{JoinGranularity, SplitAccumulator};
pub use cluster::{ClusterParams, Clusterer, Mmseqs};
pub use error::{Result, SelectionError};
pub use filter::{Comparison, IndexMode, SampleSpec};
pub use metadata::MetadataFiles;
pub use record::{ChainRecord, MetadataMaps, SeqresEntry};
pub use selection::{Selection, SelectionOutcome};
pub use split::{SplitConfig, SplitMode, Splits};
pub use structures::{ChainExtractor, PdbChainExtractor, StructureFetcher};
pub use table::ChainTable;

#[cfg(feature = "python")]
use pyo3::prelude::*;
#[cfg(feature = "python")]
use pyo3::types::PyModule;

/// Export schema constants as Python submodules
#[cfg(feature = "python")]
fn add_schema_exports(m: &Bound<'_, PyModule>) -> PyResult<()> {
    // Chain columns
    let chain = PyModule::new(m.py(), "chain")?;
    chain.add("ID", schema::chain::ID)?;
    chain.add("STRUCTURE_ID", schema::chain::STRUCTURE_ID)?;
    chain.add("CHAIN_ID", schema::chain::CHAIN_ID)?;
    chain.add("LENGTH", schema::chain::LENGTH)?;
    chain.add("MOLECULE_TYPE", schema::chain::MOLECULE_TYPE)?;
    chain.add("NAME", schema::chain::NAME)?;
    chain.add("SEQUENCE", schema::chain::SEQUENCE)?;
    chain.add("LIGANDS", schema::chain::LIGANDS)?;
    chain.add("SOURCE", schema::chain::SOURCE)?;
    chain.add("RESOLUTION", schema::chain::RESOLUTION)?;
    chain.add("DEPOSITION_DATE", schema::chain::DEPOSITION_DATE)?;
    chain.add("EXPERIMENT_TYPE", schema::chain::EXPERIMENT_TYPE)?;
    chain.add("SPLIT", schema::chain::SPLIT)?;
    m.add_submodule(&chain)?;

    // Split
    let split = PyModule::new(m.py(), "split")?;
    split.add("UNASSIGNED", schema::split::UNASSIGNED)?;
    m.add_submodule(&split)?;

    // Molecule types
    let molecule_type = PyModule::new(m.py(), "molecule_type")?;
    molecule_type.add("PROTEIN", schema::molecule_type::PROTEIN)?;
    molecule_type.add("NUCLEIC_ACID", schema::molecule_type::NUCLEIC_ACID)?;
    m.add_submodule(&molecule_type)?;

    // Experiment types
    let experiment_type = PyModule::new(m.py(), "experiment_type")?;
    experiment_type.add("DIFFRACTION", schema::experiment_type::DIFFRACTION)?;
    experiment_type.add("NMR", schema::experiment_type::NMR)?;
    experiment_type.add("EM", schema::experiment_type::EM)?;
    experiment_type.add("OTHER", schema::experiment_type::OTHER)?;
    m.add_submodule(&experiment_type)?;

    Ok(())
}

#[cfg(feature = "python")]
#[pymodule]
fn pdb_selection(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<python::PdbManager>()?;
    add_schema_exports(m)?;
    Ok(())
}
