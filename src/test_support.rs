//! Shared fixtures for unit tests: small B1500A exports and a logger.

use std::{fs, path::Path};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

pub fn init_test_logging() {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,b1500conv=debug")),
        )
        .with_test_writer()
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// Single setup, drain sweep with DrainI = DrainV / 100 kOhm.
pub const RAW_IV: &str = "SetupTitle,I/V Sweep
PrimitiveTest,I/V Sweep
TestParameter,Channel.UnitType,SMU,SMU,SMU
TestParameter,Channel.Unit,SMU1:HR,SMU2:HR,SMU3:HR
TestParameter,Channel.IName,DrainI,GateI,SourceI
TestParameter,Channel.VName,DrainV,GateV,SourceV
TestParameter,Measurement.Primary.Locus,Single
TestParameter,Measurement.Primary.Start,0
TestParameter,Measurement.Primary.Stop,0.4
Dimension1,5,5,5
DataName,DrainV,DrainI,GateV
DataValue,0,0,1
DataValue,0.1,1E-06,1
DataValue,0.2,2E-06,1
DataValue,0.3,3E-06,1
DataValue,0.4,4E-06,1
";

/// Gate sweep: DrainI = 1e-6 * (GateV - 0.5)^2 + 1e-7.
pub const RAW_GATE: &str = "SetupTitle,Id-Vg
PrimitiveTest,I/V Sweep
TestParameter,Channel.VName,GateV,DrainV
TestParameter,Channel.IName,GateI,DrainI
DataName,GateV,DrainI,DrainV
DataValue,-2,6.35E-06,0.1
DataValue,-1,2.35E-06,0.1
DataValue,0,3.5E-07,0.1
DataValue,1,3.5E-07,0.1
DataValue,2,2.35E-06,0.1
";

/// Two populated setups with different columns, then an empty setup.
pub const MULTI: &str = "SetupTitle,I/V-t Sampling
PrimitiveTest,I/V-t Sampling
TestParameter,Channel.IName,I1
TestParameter,Measurement.Time.Interval,0.01
DataName,Time,I1
DataValue,0,1.5E-12
DataValue,0.01,NaN
SetupTitle,I/V Sweep
PrimitiveTest,I/V Sweep
TestParameter,Channel.VName,V1
DataName,V1,I1
DataValue,0,2E-12
DataValue,1,3E-12
DataValue,2,4E-12
SetupTitle,Empty Setup
PrimitiveTest,I/V Sweep
";

pub fn write_fixture(dir: &Path, name: &str, content: &str) {
    fs::write(dir.join(name), content).unwrap();
}
