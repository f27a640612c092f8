// The driver multiplexer rewrites one raw status into each module's own
// vocabulary.

use ipcmgr::args::{api_status, set_api_status};
use ipcmgr::error::{EEXIST, ENOENT, ENOMEM};
use ipcmgr::{DriverMultiplexer, LoopbackDevice, ModuleId, RawTransportError};
use syslink::{HeapError, MessageQError, NameServerError, NotifyError};

const CMD_FAIL: u32 = 0x10;
const CMD_SETUP: u32 = 0x11;
const CMD_BROKEN: u32 = 0x12;

fn multiplexer(status: i32) -> DriverMultiplexer<LoopbackDevice> {
    let device = LoopbackDevice::new();
    device.on_ioctl(CMD_FAIL, move |args| {
        set_api_status(args, status);
        Ok(0)
    });
    device.on_ioctl(CMD_SETUP, |args| {
        set_api_status(args, syslink::error::S_ALREADYSETUP);
        Ok(0)
    });
    device.on_ioctl(CMD_BROKEN, |_| Err(RawTransportError::Fault));
    DriverMultiplexer::new(device)
}

fn driver(mux: &DriverMultiplexer<LoopbackDevice>, module: ModuleId) -> ipcmgr::DriverHandle {
    mux.open(module.driver_name()).unwrap()
}

#[test]
fn test_enoent_maps_per_module() {
    let mux = multiplexer(-ENOENT);
    let ns = driver(&mux, ModuleId::NameServer);
    let mq = driver(&mux, ModuleId::MessageQ);
    let heap = driver(&mux, ModuleId::HeapBufMP);

    let mut args = [0u8; 8];
    assert_eq!(mux.ioctl::<NameServerError>(ns, CMD_FAIL, &mut args), Err(NameServerError::NotFound));
    assert_eq!(api_status(&args), Some(NameServerError::NotFound.code()));

    let mut args = [0u8; 8];
    assert_eq!(mux.ioctl::<MessageQError>(mq, CMD_FAIL, &mut args), Err(MessageQError::NotFound));
    let mut args = [0u8; 8];
    assert_eq!(mux.ioctl::<HeapError>(heap, CMD_FAIL, &mut args), Err(HeapError::NotFound));

    assert_eq!(mux.usage_count(), 3);
    assert_eq!(mux.device().open_count(), 1);
}

#[test]
fn test_module_specific_codes() {
    let mux = multiplexer(-EEXIST);
    let ns = driver(&mux, ModuleId::NameServer);
    let mut args = [0u8; 4];
    assert_eq!(mux.ioctl::<NameServerError>(ns, CMD_FAIL, &mut args), Err(NameServerError::AlreadyExists));

    let mux = multiplexer(-ENOMEM);
    let mq = driver(&mux, ModuleId::MessageQ);
    let mut args = [0u8; 4];
    assert_eq!(mux.ioctl::<MessageQError>(mq, CMD_FAIL, &mut args), Err(MessageQError::Memory));

    // Notify statuses are already in Notify's vocabulary.
    let mux = multiplexer(NotifyError::EventReserved.code());
    let notify = driver(&mux, ModuleId::Notify);
    let mut args = [0u8; 4];
    assert_eq!(mux.ioctl::<NotifyError>(notify, CMD_FAIL, &mut args), Err(NotifyError::EventReserved));
}

#[test]
fn test_informational_status_is_success() {
    let mux = multiplexer(0);
    let mq = driver(&mux, ModuleId::MessageQ);
    let mut args = [0u8; 4];
    assert_eq!(
        mux.ioctl::<MessageQError>(mq, CMD_SETUP, &mut args),
        Ok(syslink::error::S_ALREADYSETUP)
    );
}

#[test]
fn test_os_failure_and_wrong_module() {
    let mux = multiplexer(0);
    let mq = driver(&mux, ModuleId::MessageQ);

    let mut args = [0u8; 4];
    assert_eq!(mux.ioctl::<MessageQError>(mq, CMD_BROKEN, &mut args), Err(MessageQError::OsFailure));
    assert_eq!(api_status(&args), Some(MessageQError::OsFailure.code()));

    let mut args = [0u8; 4];
    assert_eq!(mux.ioctl::<NameServerError>(mq, CMD_FAIL, &mut args), Err(NameServerError::InvalidArgument));
    assert_eq!(mux.ioctl_count(ModuleId::MessageQ), 1);

    mux.close(mq).unwrap();
    assert_eq!(mux.device().close_count(), 1);
}
