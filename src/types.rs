/// Globally unique remote entry identifier.
/// Example: `zx8B2a3dTbbQ_4kaXbRlRDf0yN7B`
pub type EntryId = String;
/// Normalized main-author identifier.
/// Examples: `Jane Doe`, `jane@example.org`
pub type AuthorId = String;
/// Remote dataset identifier.
/// Example: `Rb0Qv1ZvSeO7eKZ8mDsUBQ`
pub type DatasetId = String;
/// Simulation code or parser entry point used to partition entries.
/// Examples: `VASP`, `Quantum Espresso`, `parsers/vasp`
pub type CodeName = String;
/// Opaque pagination token returned by the remote (`next_page_after_value`).
pub type Cursor = String;
/// Stable identifier of the query that produced a record.
/// Example: `results.method.simulation.program_name=VASP`
pub type QueryId = String;
/// Method/classification tag attached to an entry.
/// Examples: `DFT`, `GW`
pub type MethodTag = String;
/// Warning text recorded in run metadata.
/// Example: `code 'VASP' under-filled: 3 of 5 required entries`
pub type LogMessage = String;
