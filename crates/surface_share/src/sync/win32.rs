//! Win32 named mutex and semaphore backed primitives.

use std::time::Duration;
use windows::Win32::Foundation::{CloseHandle, HANDLE, WAIT_ABANDONED, WAIT_OBJECT_0};
use windows::Win32::System::Threading::{
    CreateMutexW, CreateSemaphoreW, ReleaseMutex, ReleaseSemaphore, WaitForSingleObject,
};
use windows::core::HSTRING;

use super::{NamedCounter, NamedLock, SyncBackend, SyncError};

#[derive(Clone, Copy, Default)]
pub struct Win32Sync;

impl SyncBackend for Win32Sync {
    type Lock = Win32Mutex;
    type Counter = Win32Semaphore;

    fn open_lock(&self, name: &str) -> Result<Win32Mutex, SyncError> {
        let handle = unsafe { CreateMutexW(None, false, &HSTRING::from(name)) }.map_err(|e| {
            SyncError::Open {
                name: name.to_owned(),
                reason: format!("CreateMutexW failed: {:?}", e),
            }
        })?;
        Ok(Win32Mutex { handle })
    }

    fn open_counter(&self, name: &str) -> Result<Win32Semaphore, SyncError> {
        let handle = unsafe { CreateSemaphoreW(None, 0, i32::MAX, &HSTRING::from(name)) }
            .map_err(|e| SyncError::Open {
                name: name.to_owned(),
                reason: format!("CreateSemaphoreW failed: {:?}", e),
            })?;
        Ok(Win32Semaphore { handle })
    }
}

pub struct Win32Mutex {
    handle: HANDLE,
}

impl NamedLock for Win32Mutex {
    fn try_acquire(&self, timeout: Duration) -> bool {
        let millis = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX - 1);
        let result = unsafe { WaitForSingleObject(self.handle, millis) };
        // An abandoned mutex is ours now; its previous owner exited while holding it.
        result == WAIT_OBJECT_0 || result == WAIT_ABANDONED
    }

    fn release(&self) {
        let _ = unsafe { ReleaseMutex(self.handle) };
    }
}

impl Drop for Win32Mutex {
    fn drop(&mut self) {
        if !self.handle.is_invalid() {
            let _ = unsafe { CloseHandle(self.handle) };
        }
    }
}

unsafe impl Send for Win32Mutex {}

/// Frame counter kept in the count of a named semaphore.
pub struct Win32Semaphore {
    handle: HANDLE,
}

impl NamedCounter for Win32Semaphore {
    fn increment(&self) -> u64 {
        let mut previous = 0i32;
        match unsafe { ReleaseSemaphore(self.handle, 1, Some(&mut previous as *mut i32)) } {
            Ok(()) => previous as u64 + 1,
            Err(_) => previous as u64,
        }
    }

    fn read(&self) -> u64 {
        // Take one count and put it back to learn the value.
        if unsafe { WaitForSingleObject(self.handle, 0) } != WAIT_OBJECT_0 {
            return 0;
        }
        let mut previous = 0i32;
        match unsafe { ReleaseSemaphore(self.handle, 1, Some(&mut previous as *mut i32)) } {
            Ok(()) => previous as u64 + 1,
            Err(_) => 0,
        }
    }
}

impl Drop for Win32Semaphore {
    fn drop(&mut self) {
        if !self.handle.is_invalid() {
            let _ = unsafe { CloseHandle(self.handle) };
        }
    }
}

unsafe impl Send for Win32Semaphore {}
